// File: maowtune-core/src/sources/tee.rs

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use super::SourceStream;

const TEE_CHUNK_BYTES: usize = 16 * 1024;

fn chunks_for(bytes: usize) -> usize {
    (bytes / TEE_CHUNK_BYTES).max(1)
}

/// Splits `source` into two independently buffered streams.
///
/// The primary side applies backpressure to the source. The secondary side
/// never does: once its buffer is full it is detached and sees end of
/// stream, so a slow secondary reader cannot stall the primary one.
pub fn tee_source(
    mut source: SourceStream,
    primary_bytes: usize,
    secondary_bytes: usize,
) -> (SourceStream, SourceStream) {
    let (primary_tx, primary_rx) = mpsc::channel::<io::Result<Bytes>>(chunks_for(primary_bytes));
    let (secondary_tx, secondary_rx) =
        mpsc::channel::<io::Result<Bytes>>(chunks_for(secondary_bytes));

    tokio::spawn(async move {
        let mut secondary = Some(secondary_tx);
        let mut buf = BytesMut::with_capacity(TEE_CHUNK_BYTES);
        let mut total = 0usize;

        loop {
            buf.reserve(TEE_CHUNK_BYTES);
            match source.read_buf(&mut buf).await {
                Ok(0) => {
                    trace!("(Tee) source finished after {total} bytes");
                    break;
                }
                Ok(n) => {
                    total += n;
                    let chunk = buf.split().freeze();

                    let detach = secondary
                        .as_ref()
                        .is_some_and(|tx| tx.try_send(Ok(chunk.clone())).is_err());
                    if detach {
                        debug!("(Tee) secondary reader fell behind or left => detaching it");
                        secondary = None;
                    }

                    if primary_tx.send(Ok(chunk)).await.is_err() {
                        debug!("(Tee) primary reader dropped => stopping");
                        break;
                    }
                }
                Err(e) => {
                    if let Some(tx) = secondary.take() {
                        let _ = tx.try_send(Err(io::Error::new(e.kind(), e.to_string())));
                    }
                    let _ = primary_tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    (
        Box::new(StreamReader::new(ReceiverStream::new(primary_rx))),
        Box::new(StreamReader::new(ReceiverStream::new(secondary_rx))),
    )
}
