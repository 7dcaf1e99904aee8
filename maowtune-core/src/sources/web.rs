// File: maowtune-core/src/sources/web.rs
//
// Generic web loader: streams an HTTP body as a source.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_util::io::StreamReader;
use tracing::{info, warn};
use url::Url;

use super::SourceStream;
use crate::utils::time::format_size;

static DOWNLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Streams the body of `url`. Non-success statuses and transfer errors are
/// reported as read errors on the returned stream.
pub fn http_source(client: reqwest::Client, url: Url) -> SourceStream {
    let download_id = DOWNLOAD_SEQ.fetch_add(1, Ordering::Relaxed) + 1;

    let body = stream::once(async move {
        let host = url.host_str().unwrap_or("?").to_string();
        info!("(WebLoader) #{download_id} Starting download from {host}");

        let response = client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match response {
            Ok(resp) => {
                if let Some(len) = resp.content_length() {
                    info!("(WebLoader) #{download_id} Data size {}", format_size(len));
                }
                resp.bytes_stream()
                    .map(|chunk| chunk.map_err(io::Error::other))
                    .boxed()
            }
            Err(e) => {
                warn!("(WebLoader) #{download_id} Download error: {e}");
                let items: [io::Result<Bytes>; 1] = [Err(io::Error::other(e))];
                stream::iter(items).boxed()
            }
        }
    })
    .flatten();

    let body: BoxStream<'static, io::Result<Bytes>> = body.boxed();
    Box::new(StreamReader::new(body))
}
