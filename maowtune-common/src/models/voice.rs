// File: maowtune-common/src/models/voice.rs
//
// Status signals and stream types exchanged with the voice transport.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;

/// Websocket close code the voice gateway sends when the session was ended
/// on purpose (kicked, channel deleted, moved by a moderator...).
pub const SESSION_FORCIBLY_ENDED_CLOSE_CODE: u16 = 4014;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    WebSocketClose { code: u16 },
    AdapterUnavailable,
    EndpointRemoved,
    Manual,
}

impl DisconnectReason {
    pub fn is_forcibly_ended(&self) -> bool {
        matches!(
            self,
            DisconnectReason::WebSocketClose { code } if *code == SESSION_FORCIBLY_ENDED_CLOSE_CODE
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected(DisconnectReason),
    Connecting,
    Signalling,
    Ready,
    Destroyed,
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected(_))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected(reason) => write!(f, "disconnected({reason:?})"),
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Signalling => f.write_str("signalling"),
            ConnectionStatus::Ready => f.write_str("ready"),
            ConnectionStatus::Destroyed => f.write_str("destroyed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerStatus::Idle => "idle",
            PlayerStatus::Buffering => "buffering",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// A transition reported by the voice transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    Connection(ConnectionStatus),
    Player(PlayerStatus),
    ConnectionError(String),
    PlayerError(String),
}

/// Callback registration handed to the transport on join. Every status
/// transition of the connection or its player must be reported through it.
#[derive(Clone)]
pub struct VoiceEventSink {
    callback: Arc<dyn Fn(VoiceEvent) + Send + Sync>,
}

impl VoiceEventSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(VoiceEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn emit(&self, event: VoiceEvent) {
        (self.callback)(event);
    }

    pub fn connection(&self, status: ConnectionStatus) {
        self.emit(VoiceEvent::Connection(status));
    }

    pub fn player(&self, status: PlayerStatus) {
        self.emit(VoiceEvent::Player(status));
    }
}

impl fmt::Debug for VoiceEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceEventSink").finish_non_exhaustive()
    }
}

/// Container/codec tag for a stream handed to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Opus packets in an Ogg container, 2 channels, 48 kHz.
    OggOpus,
}

/// An audio stream ready to be played by the transport.
pub struct PlayableStream {
    pub kind: StreamKind,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl PlayableStream {
    pub fn new<R>(kind: StreamKind, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            kind,
            reader: Box::pin(reader),
        }
    }

    pub fn ogg_opus<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(StreamKind::OggOpus, reader)
    }
}

impl fmt::Debug for PlayableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableStream")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
