//! src/sources/mod.rs
//!
//! Raw byte sources feeding the conversion engine. A source never fails
//! up front: fetch and read problems surface as read errors on the stream,
//! which is where the engine watches for them.

pub mod tee;
pub mod web;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::warn;

pub use tee::tee_source;
pub use web::http_source;

/// A raw, not yet converted, byte stream.
pub type SourceStream = Box<dyn AsyncRead + Send + Unpin>;

/// Zero-argument function producing a fresh source stream on each call.
#[derive(Clone)]
pub struct SourceFactory {
    open: Arc<dyn Fn() -> SourceStream + Send + Sync>,
}

impl SourceFactory {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> SourceStream + Send + Sync + 'static,
    {
        Self { open: Arc::new(open) }
    }

    pub fn open(&self) -> SourceStream {
        (self.open)()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(move || file_source(&path))
    }

    pub fn http(client: reqwest::Client, url: url::Url) -> Self {
        Self::new(move || http_source(client.clone(), url.clone()))
    }

    pub fn memory(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(move || memory_source(data.clone()))
    }
}

impl fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFactory").finish_non_exhaustive()
    }
}

pub fn file_source(path: &Path) -> SourceStream {
    match std::fs::File::open(path) {
        Ok(file) => Box::new(tokio::fs::File::from_std(file)),
        Err(e) => {
            warn!("(FileSource) Could not open {}: {e}", path.display());
            failed_source(e)
        }
    }
}

pub fn memory_source(data: Bytes) -> SourceStream {
    Box::new(io::Cursor::new(data))
}

/// A stream whose first read fails with `error`.
pub fn failed_source(error: io::Error) -> SourceStream {
    let items: [io::Result<Bytes>; 1] = [Err(error)];
    Box::new(StreamReader::new(futures_util::stream::iter(items)))
}
