// File: maowtune-core/src/converter/stream.rs

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::Error;

/// Opaque key of an in-flight conversion in the engine registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversionId(pub(crate) u64);

impl fmt::Display for ConversionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a conversion was torn down before its source ended cleanly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionFailure {
    #[error("source failed: {message}")]
    Source { kind: io::ErrorKind, message: String },

    #[error("source closed before the end of the stream: {0}")]
    Truncated(String),
}

impl ConversionFailure {
    pub fn from_source_error(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => ConversionFailure::Truncated(e.to_string()),
            kind => ConversionFailure::Source {
                kind,
                message: e.to_string(),
            },
        }
    }

    pub fn is_truncation(&self) -> bool {
        matches!(self, ConversionFailure::Truncated(_))
    }

    pub(crate) fn to_io_error(&self) -> io::Error {
        let kind = match self {
            ConversionFailure::Source { kind, .. } => *kind,
            ConversionFailure::Truncated(_) => io::ErrorKind::UnexpectedEof,
        };
        io::Error::new(kind, self.to_string())
    }
}

impl From<ConversionFailure> for Error {
    fn from(f: ConversionFailure) -> Self {
        match f {
            ConversionFailure::Source { .. } => Error::Source(f.to_string()),
            ConversionFailure::Truncated(_) => Error::Conversion(f.to_string()),
        }
    }
}

/// First failure of a conversion, shared between the input pump and the
/// output stream. Recording a failure also fires the one-shot signal.
pub(crate) struct FailureSlot {
    failure: Mutex<Option<ConversionFailure>>,
    signal: Mutex<Option<oneshot::Sender<ConversionFailure>>>,
}

impl FailureSlot {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<ConversionFailure>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            failure: Mutex::new(None),
            signal: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    /// Returns false if a failure was already recorded.
    pub(crate) fn fail(&self, failure: ConversionFailure) -> bool {
        {
            let mut slot = self.failure.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(failure.clone());
        }
        if let Some(tx) = self.signal.lock().take() {
            let _ = tx.send(failure);
        }
        true
    }

    pub(crate) fn get(&self) -> Option<ConversionFailure> {
        self.failure.lock().clone()
    }
}

/// Read-only view of a conversion's failure state that outlives the
/// output stream it was taken from.
#[derive(Clone)]
pub struct FailureWatch(Arc<FailureSlot>);

impl FailureWatch {
    pub fn get(&self) -> Option<ConversionFailure> {
        self.0.get()
    }
}

impl fmt::Debug for FailureWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FailureWatch").field(&self.0.get()).finish()
    }
}

/// Output side of a conversion: converted audio, followed by the source
/// failure (as a read error) if the conversion was torn down because of one.
pub struct ConvertedStream {
    id: ConversionId,
    reader: StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>,
    failure: Arc<FailureSlot>,
    failure_rx: Option<oneshot::Receiver<ConversionFailure>>,
}

impl ConvertedStream {
    pub(crate) fn new(
        id: ConversionId,
        rx: mpsc::Receiver<io::Result<Bytes>>,
        failure: Arc<FailureSlot>,
        failure_rx: oneshot::Receiver<ConversionFailure>,
    ) -> Self {
        Self {
            id,
            reader: StreamReader::new(ReceiverStream::new(rx)),
            failure,
            failure_rx: Some(failure_rx),
        }
    }

    pub fn conversion_id(&self) -> ConversionId {
        self.id
    }

    /// Resolves once if the conversion fails. The sender is dropped
    /// without a value when the conversion ends any other way.
    pub fn take_failure_signal(&mut self) -> Option<oneshot::Receiver<ConversionFailure>> {
        self.failure_rx.take()
    }

    pub fn failure(&self) -> Option<ConversionFailure> {
        self.failure.get()
    }

    /// A failure recorded before this stream reports its end is always
    /// visible through the watch by then.
    pub fn failure_watch(&self) -> FailureWatch {
        FailureWatch(self.failure.clone())
    }
}

impl AsyncRead for ConvertedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        match Pin::new(&mut this.reader).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if had_room && buf.filled().len() == before => match this.failure.get() {
                Some(f) => Poll::Ready(Err(f.to_io_error())),
                None => Poll::Ready(Ok(())),
            },
            other => other,
        }
    }
}

impl fmt::Debug for ConvertedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedStream")
            .field("id", &self.id)
            .field("failure", &self.failure.get())
            .finish_non_exhaustive()
    }
}
