// src/lib.rs

pub mod config;
pub mod converter;
pub mod playback;
pub mod sources;
pub mod test_utils;
pub mod tracks;
pub mod utils;

pub use config::{PlayerConfig, SessionConfig, TranscoderConfig};
pub use converter::{ConversionEngine, ConversionId, ConvertedStream, TranscoderCommand};
pub use maowtune_common::error::Error;
pub use playback::{PlaybackSession, SessionManager, SessionSnapshot};
pub use sources::SourceFactory;
pub use tracks::{Track, TrackInfo, TrackKind};
