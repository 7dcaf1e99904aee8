// File: maowtune-core/src/test_utils/voice.rs

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use maowtune_common::models::{
    ConnectionStatus, DisconnectReason, PlayableStream, PlayerStatus, VoiceEvent, VoiceEventSink,
};
use maowtune_common::traits::{AudioPlayer, VoiceConnection, VoiceLink, VoiceTransport};
use parking_lot::Mutex;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use crate::Error;

/// Everything the session asked the fake transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCall {
    Join(Id<ChannelMarker>),
    Rejoin(Option<Id<ChannelMarker>>),
    Disconnect,
    Destroy,
    Play,
    Stop,
    Pause,
    Unpause,
}

#[derive(Default)]
struct FakeVoiceState {
    calls: Vec<VoiceCall>,
    sink: Option<VoiceEventSink>,
    connection: Option<ConnectionStatus>,
    player: PlayerStatus,
    rejoin_attempts: u32,
    streams: Vec<PlayableStream>,
    /// Bumped on every accepted `play`.
    generation: u64,
    read_errors: Vec<io::ErrorKind>,

    auto_ready: bool,
    drain_streams: bool,
    defer_ack: bool,
    rejoin_fails: bool,
    fail_play: bool,
    fail_join: bool,
}

/// Voice transport that records calls and reports transitions the way a
/// real gateway client would, synchronously through the registered sink.
#[derive(Clone)]
pub struct FakeVoiceTransport {
    state: Arc<Mutex<FakeVoiceState>>,
}

impl Default for FakeVoiceTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVoiceTransport {
    /// Connections become Ready as soon as they are joined.
    pub fn new() -> Self {
        let state = FakeVoiceState {
            auto_ready: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Connections stay Signalling until the test says otherwise.
    pub fn manual() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeVoiceState::default())),
        }
    }

    /// Every rejoin ends in another Disconnected.
    pub fn set_rejoin_fails(&self, fails: bool) {
        self.state.lock().rejoin_fails = fails;
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.state.lock().fail_play = fail;
    }

    pub fn set_fail_join(&self, fail: bool) {
        self.state.lock().fail_join = fail;
    }

    /// The player reads every stream to its end and goes Idle on its own,
    /// whether the stream ends cleanly or with an error.
    pub fn set_drain_streams(&self, drain: bool) {
        self.state.lock().drain_streams = drain;
    }

    /// `play` reports nothing; the test emits Buffering/Playing itself.
    pub fn set_defer_ack(&self, defer: bool) {
        self.state.lock().defer_ack = defer;
    }

    /// Errors the draining player hit while reading.
    pub fn read_errors(&self) -> Vec<io::ErrorKind> {
        self.state.lock().read_errors.clone()
    }

    pub fn calls(&self) -> Vec<VoiceCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &VoiceCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn play_count(&self) -> usize {
        self.count(&VoiceCall::Play)
    }

    pub fn rejoin_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, VoiceCall::Rejoin(_)))
            .count()
    }

    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        self.state.lock().connection
    }

    pub fn player_status(&self) -> PlayerStatus {
        self.state.lock().player
    }

    /// Takes the most recently played stream, if the player still holds it.
    pub fn take_stream(&self) -> Option<PlayableStream> {
        self.state.lock().streams.pop()
    }

    pub fn emit_connection(&self, status: ConnectionStatus) {
        emit(&self.state, [VoiceEvent::Connection(status)]);
    }

    pub fn emit_player(&self, status: PlayerStatus) {
        emit(&self.state, [VoiceEvent::Player(status)]);
    }

    /// The current track played to its end.
    pub fn finish_current(&self) {
        self.emit_player(PlayerStatus::Idle);
    }
}

/// Applies `events` to the fake's own view, then reports them outside the
/// lock.
fn emit<const N: usize>(state: &Mutex<FakeVoiceState>, events: [VoiceEvent; N]) {
    let sink = {
        let mut s = state.lock();
        for event in &events {
            match event {
                VoiceEvent::Connection(status) => {
                    if status.is_ready() {
                        s.rejoin_attempts = 0;
                    }
                    s.connection = Some(*status);
                }
                VoiceEvent::Player(status) => {
                    if *status == PlayerStatus::Idle {
                        s.streams.clear();
                    }
                    s.player = *status;
                }
                _ => {}
            }
        }
        s.sink.clone()
    };
    if let Some(sink) = sink {
        for event in events {
            sink.emit(event);
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeVoiceTransport {
    async fn join(
        &self,
        _guild_id: Id<GuildMarker>,
        channel_id: Id<ChannelMarker>,
        events: VoiceEventSink,
    ) -> Result<VoiceLink, Error> {
        let auto_ready = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Join(channel_id));
            if s.fail_join {
                return Err(Error::Voice("join refused".into()));
            }
            s.sink = Some(events);
            s.connection = Some(ConnectionStatus::Signalling);
            s.player = PlayerStatus::Idle;
            s.rejoin_attempts = 0;
            s.streams.clear();
            s.auto_ready
        };
        if auto_ready {
            self.emit_connection(ConnectionStatus::Ready);
        }

        Ok(VoiceLink {
            connection: Box::new(FakeConnection {
                state: self.state.clone(),
            }),
            player: Box::new(FakePlayer {
                state: self.state.clone(),
            }),
        })
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeVoiceState>>,
}

impl VoiceConnection for FakeConnection {
    fn rejoin(&mut self, channel_id: Option<Id<ChannelMarker>>) -> bool {
        let (fails, auto_ready) = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Rejoin(channel_id));
            if channel_id.is_none() {
                s.rejoin_attempts += 1;
            }
            (s.rejoin_fails, s.auto_ready)
        };
        if fails {
            emit(
                &self.state,
                [VoiceEvent::Connection(ConnectionStatus::Disconnected(
                    DisconnectReason::WebSocketClose { code: 4006 },
                ))],
            );
        } else if auto_ready {
            emit(
                &self.state,
                [
                    VoiceEvent::Connection(ConnectionStatus::Signalling),
                    VoiceEvent::Connection(ConnectionStatus::Ready),
                ],
            );
        } else {
            emit(&self.state, [VoiceEvent::Connection(ConnectionStatus::Signalling)]);
        }
        true
    }

    fn rejoin_attempts(&self) -> u32 {
        self.state.lock().rejoin_attempts
    }

    fn disconnect(&mut self) -> bool {
        self.state.lock().calls.push(VoiceCall::Disconnect);
        emit(
            &self.state,
            [VoiceEvent::Connection(ConnectionStatus::Disconnected(
                DisconnectReason::Manual,
            ))],
        );
        true
    }

    fn destroy(&mut self) {
        let already = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Destroy);
            s.connection == Some(ConnectionStatus::Destroyed)
        };
        if !already {
            emit(&self.state, [VoiceEvent::Connection(ConnectionStatus::Destroyed)]);
        }
    }
}

async fn drain(state: Arc<Mutex<FakeVoiceState>>, generation: u64, stream: PlayableStream) {
    let mut reader = stream.reader;
    let res = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    let still_current = {
        let mut s = state.lock();
        if let Err(e) = res {
            s.read_errors.push(e.kind());
        }
        s.generation == generation && s.player != PlayerStatus::Idle
    };
    if still_current {
        emit(&state, [VoiceEvent::Player(PlayerStatus::Idle)]);
    }
}

struct FakePlayer {
    state: Arc<Mutex<FakeVoiceState>>,
}

impl AudioPlayer for FakePlayer {
    fn play(&mut self, stream: PlayableStream) -> Result<(), Error> {
        let (generation, drained, defer_ack) = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Play);
            if s.fail_play {
                return Err(Error::Voice("player refused the stream".into()));
            }
            s.generation += 1;
            let drained = if s.drain_streams {
                Some(stream)
            } else {
                s.streams.push(stream);
                None
            };
            (s.generation, drained, s.defer_ack)
        };
        if !defer_ack {
            emit(
                &self.state,
                [
                    VoiceEvent::Player(PlayerStatus::Buffering),
                    VoiceEvent::Player(PlayerStatus::Playing),
                ],
            );
        }
        if let Some(stream) = drained {
            tokio::spawn(drain(self.state.clone(), generation, stream));
        }
        Ok(())
    }

    fn stop(&mut self) -> bool {
        let idle = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Stop);
            s.player == PlayerStatus::Idle
        };
        if !idle {
            emit(&self.state, [VoiceEvent::Player(PlayerStatus::Idle)]);
        }
        true
    }

    fn pause(&mut self) -> bool {
        let playing = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Pause);
            s.player == PlayerStatus::Playing
        };
        if playing {
            emit(&self.state, [VoiceEvent::Player(PlayerStatus::Paused)]);
        }
        playing
    }

    fn unpause(&mut self) -> bool {
        let paused = {
            let mut s = self.state.lock();
            s.calls.push(VoiceCall::Unpause);
            s.player == PlayerStatus::Paused
        };
        if paused {
            emit(&self.state, [VoiceEvent::Player(PlayerStatus::Playing)]);
        }
        paused
    }
}
