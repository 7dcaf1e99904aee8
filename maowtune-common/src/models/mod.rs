// File: maowtune-common/src/models/mod.rs
pub mod track;
pub mod voice;

pub use track::{AudioMetadata, LoopMode, MusicInfo, TrackOrigin, VideoInfo};
pub use voice::{
    ConnectionStatus, DisconnectReason, PlayableStream, PlayerStatus, StreamKind, VoiceEvent,
    VoiceEventSink,
};
