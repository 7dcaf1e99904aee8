// File: maowtune-common/src/traits/voice_traits.rs

use async_trait::async_trait;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::error::Error;
use crate::models::voice::{PlayableStream, VoiceEventSink};

/// A connection plus the player already subscribed to it.
pub struct VoiceLink {
    pub connection: Box<dyn VoiceConnection>,
    pub player: Box<dyn AudioPlayer>,
}

/// The gateway/voice client. Implementations own the network side entirely;
/// the playback core only sees status transitions through the sink.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Opens a connection to `channel_id` and a player subscribed to it.
    /// All later transitions of both are reported through `events`.
    async fn join(
        &self,
        guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
        events: VoiceEventSink,
    ) -> Result<VoiceLink, Error>;
}

pub trait VoiceConnection: Send {
    /// Re-establishes the connection, or moves it when `channel_id` is set.
    /// Only reconnects (`None`) increment the attempt counter; a channel
    /// move is not a retry.
    fn rejoin(&mut self, channel_id: Option<Id<ChannelMarker>>) -> bool;

    /// Number of reconnects since the connection last became ready.
    fn rejoin_attempts(&self) -> u32;

    fn disconnect(&mut self) -> bool;

    /// Must be idempotent.
    fn destroy(&mut self);
}

pub trait AudioPlayer: Send {
    fn play(&mut self, stream: PlayableStream) -> Result<(), Error>;
    fn stop(&mut self) -> bool;
    fn pause(&mut self) -> bool;
    fn unpause(&mut self) -> bool;
}
