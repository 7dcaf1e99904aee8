pub mod voice_traits;

pub use voice_traits::{AudioPlayer, VoiceConnection, VoiceLink, VoiceTransport};
