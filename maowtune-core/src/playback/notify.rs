// File: maowtune-core/src/playback/notify.rs

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::Error;
use crate::tracks::TrackInfo;

/// Receives playback problems that the requester should hear about.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackNotifier: Send + Sync {
    fn track_error(&self, track: &TrackInfo, error: &Error);
}

/// Only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl PlaybackNotifier for LogNotifier {
    fn track_error(&self, track: &TrackInfo, error: &Error) {
        warn!(
            "(PlaybackNotifier) Failed to play '{}' for {}: {error}",
            track.title, track.origin.display_name
        );
    }
}

#[derive(Debug, Clone)]
pub struct TrackErrorNotice {
    pub track: TrackInfo,
    pub message: String,
}

/// Forwards notices to whoever replies to users.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<TrackErrorNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrackErrorNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PlaybackNotifier for ChannelNotifier {
    fn track_error(&self, track: &TrackInfo, error: &Error) {
        let notice = TrackErrorNotice {
            track: track.clone(),
            message: error.to_string(),
        };
        if self.tx.send(notice).is_err() {
            trace!("(ChannelNotifier) receiver gone, notice dropped");
        }
    }
}
