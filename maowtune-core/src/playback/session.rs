// File: maowtune-core/src/playback/session.rs
//
// One playback session per guild. All state lives in a single actor task;
// commands, voice transport events, timer expirations and conversion
// failures arrive through one inbox and are handled in arrival order.

use std::sync::Arc;
use std::time::Duration;

use maowtune_common::models::{
    ConnectionStatus, DisconnectReason, LoopMode, PlayableStream, PlayerStatus, VoiceEvent,
    VoiceEventSink,
};
use maowtune_common::traits::{VoiceLink, VoiceTransport};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use super::clock::PlaybackClock;
use super::notify::PlaybackNotifier;
use super::queue::TrackQueue;
use crate::Error;
use crate::config::SessionConfig;
use crate::converter::{ConversionFailure, FailureWatch};
use crate::tracks::{Track, TrackInfo};

/// Point-in-time view of a session for listings and "now playing" replies.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub guild_id: Id<GuildMarker>,
    pub channel_id: Option<Id<ChannelMarker>>,
    pub connected: bool,
    pub connection_status: ConnectionStatus,
    pub player_status: PlayerStatus,
    pub loop_mode: LoopMode,
    pub current: Option<TrackInfo>,
    pub queue: Vec<TrackInfo>,
    pub elapsed_secs: u64,
}

enum SessionCommand {
    Join {
        channel_id: Id<ChannelMarker>,
        force: bool,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Enqueue {
        track: Track,
        at_top: bool,
        reply: oneshot::Sender<()>,
    },
    Skip {
        count: usize,
        reply: oneshot::Sender<bool>,
    },
    TogglePause {
        reply: oneshot::Sender<bool>,
    },
    SetLoopMode {
        mode: LoopMode,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Connection must reach Ready before this fires.
    Negotiation,
    /// After a forced close, the gateway gets this long to start reconnecting.
    AwaitConnecting,
    /// Delay before a manual rejoin.
    RejoinBackoff,
}

enum SessionMessage {
    Command(SessionCommand),
    Voice { epoch: u64, event: VoiceEvent },
    Timer { token: u64, kind: TimerKind },
    TrackFailed { play_id: u64, failure: ConversionFailure },
}

/// Cloneable handle to a guild's session actor. The actor stops, leaving
/// voice, once every handle is dropped.
#[derive(Clone)]
pub struct PlaybackSession {
    guild_id: Id<GuildMarker>,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("guild_id", &self.guild_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl PlaybackSession {
    /// Starts the actor on the current runtime.
    pub fn spawn(
        guild_id: Id<GuildMarker>,
        transport: Arc<dyn VoiceTransport>,
        notifier: Arc<dyn PlaybackNotifier>,
        config: SessionConfig,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let actor = SessionActor {
            guild_id,
            transport,
            notifier,
            config,
            inbox,
            weak_tx: tx.downgrade(),
            link: None,
            channel_id: None,
            epoch: 0,
            connection_status: ConnectionStatus::Disconnected(DisconnectReason::Manual),
            player_status: PlayerStatus::Idle,
            queue: TrackQueue::new(),
            current: None,
            loop_mode: LoopMode::None,
            awaiting_playback_ack: false,
            negotiation: None,
            reconnect: None,
            next_token: 0,
            play_seq: 0,
            clock: PlaybackClock::default(),
        };
        tokio::spawn(actor.run());
        Self { guild_id, tx }
    }

    pub fn guild_id(&self) -> Id<GuildMarker> {
        self.guild_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_same(&self, other: &PlaybackSession) -> bool {
        self.tx.same_channel(&other.tx)
    }

    fn closed(&self) -> Error {
        Error::SessionClosed(self.guild_id.to_string())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Command(make(reply)))
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Connects to `channel_id`. Does nothing when already connected unless
    /// `force` is set, in which case the live connection moves channels.
    pub async fn join_voice(&self, channel_id: Id<ChannelMarker>, force: bool) -> Result<(), Error> {
        self.request(|reply| SessionCommand::Join {
            channel_id,
            force,
            reply,
        })
        .await?
    }

    /// Clears the queue, stops playback and tears the connection down.
    pub async fn leave_voice(&self) -> Result<(), Error> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }

    pub async fn enqueue(&self, track: Track, at_top: bool) -> Result<(), Error> {
        self.request(|reply| SessionCommand::Enqueue {
            track,
            at_top,
            reply,
        })
        .await
    }

    /// Skips the current track plus `count - 1` queued ones. Returns false
    /// when nothing is playing.
    pub async fn skip(&self, count: usize) -> Result<bool, Error> {
        self.request(|reply| SessionCommand::Skip { count, reply }).await
    }

    pub async fn toggle_pause(&self) -> Result<bool, Error> {
        self.request(|reply| SessionCommand::TogglePause { reply }).await
    }

    /// Rejected (false) when nothing is current.
    pub async fn set_loop_mode(&self, mode: LoopMode) -> Result<bool, Error> {
        self.request(|reply| SessionCommand::SetLoopMode { mode, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, Error> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }
}

struct NowPlaying {
    track: Track,
    play_id: u64,
    failure: FailureWatch,
    /// Skipped under loop `one`; must not be requeued.
    skipped: bool,
    /// Failure already reported; never requeued.
    failed: bool,
}

struct SessionActor {
    guild_id: Id<GuildMarker>,
    transport: Arc<dyn VoiceTransport>,
    notifier: Arc<dyn PlaybackNotifier>,
    config: SessionConfig,
    inbox: mpsc::UnboundedReceiver<SessionMessage>,
    weak_tx: mpsc::WeakUnboundedSender<SessionMessage>,

    link: Option<VoiceLink>,
    channel_id: Option<Id<ChannelMarker>>,
    /// Bumped per connection; events tagged with an older epoch are stale.
    epoch: u64,
    connection_status: ConnectionStatus,
    player_status: PlayerStatus,

    queue: TrackQueue,
    current: Option<NowPlaying>,
    loop_mode: LoopMode,
    /// A stream was handed to the player and it has not left Idle yet.
    awaiting_playback_ack: bool,

    negotiation: Option<u64>,
    reconnect: Option<u64>,
    next_token: u64,
    play_seq: u64,
    clock: PlaybackClock,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("(PlaybackSession) guild {} session started", self.guild_id);

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                SessionMessage::Command(cmd) => self.handle_command(cmd).await,
                SessionMessage::Voice { epoch, event } => {
                    if epoch != self.epoch {
                        trace!(
                            "(PlaybackSession) guild {} ignoring stale event {event:?}",
                            self.guild_id
                        );
                        continue;
                    }
                    self.on_voice_event(event);
                }
                SessionMessage::Timer { token, kind } => self.on_timer(token, kind),
                SessionMessage::TrackFailed { play_id, failure } => {
                    self.on_track_failed(play_id, failure)
                }
            }
        }

        if self.link.is_some() || self.current.is_some() || !self.queue.is_empty() {
            self.leave_voice();
        }
        debug!("(PlaybackSession) guild {} session stopped", self.guild_id);
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Join {
                channel_id,
                force,
                reply,
            } => {
                let res = self.join_voice(channel_id, force).await;
                let _ = reply.send(res);
            }
            SessionCommand::Leave { reply } => {
                self.leave_voice();
                let _ = reply.send(());
            }
            SessionCommand::Enqueue {
                track,
                at_top,
                reply,
            } => {
                self.enqueue(track, at_top);
                let _ = reply.send(());
            }
            SessionCommand::Skip { count, reply } => {
                let _ = reply.send(self.skip(count));
            }
            SessionCommand::TogglePause { reply } => {
                let _ = reply.send(self.toggle_pause());
            }
            SessionCommand::SetLoopMode { mode, reply } => {
                let _ = reply.send(self.set_loop_mode(mode));
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // ----------------------------------------------------------------
    // Commands
    // ----------------------------------------------------------------

    async fn join_voice(&mut self, channel_id: Id<ChannelMarker>, force: bool) -> Result<(), Error> {
        if let Some(link) = self.link.as_mut() {
            if !force {
                debug!(
                    "(PlaybackSession) guild {} already connected, join ignored",
                    self.guild_id
                );
                return Ok(());
            }
            info!(
                "(PlaybackSession) guild {} moving to channel {channel_id}",
                self.guild_id
            );
            if !link.connection.rejoin(Some(channel_id)) {
                return Err(Error::Voice(format!("rejoin to channel {channel_id} refused")));
            }
            self.channel_id = Some(channel_id);
            return Ok(());
        }

        self.epoch += 1;
        let events = self.event_sink(self.epoch);
        let link = self
            .transport
            .join(self.guild_id, channel_id, events)
            .await?;

        info!(
            "(PlaybackSession) guild {} joined channel {channel_id}",
            self.guild_id
        );
        self.link = Some(link);
        self.channel_id = Some(channel_id);
        self.connection_status = ConnectionStatus::Signalling;
        self.player_status = PlayerStatus::Idle;
        self.start_negotiation_deadline();
        Ok(())
    }

    fn leave_voice(&mut self) {
        let dropped = self.queue.clear();

        if let Some(mut link) = self.link.take() {
            link.player.stop();
            if !self.connection_status.is_disconnected() {
                link.connection.disconnect();
            }
            if self.connection_status != ConnectionStatus::Destroyed {
                link.connection.destroy();
            }
        }
        if let Some(mut now) = self.current.take() {
            now.track.cleanup();
        }

        // Whatever the old connection still reports is stale from here on.
        self.epoch += 1;
        self.channel_id = None;
        self.connection_status = ConnectionStatus::Disconnected(DisconnectReason::Manual);
        self.player_status = PlayerStatus::Idle;
        self.awaiting_playback_ack = false;
        self.negotiation = None;
        self.reconnect = None;
        self.clock.reset();

        info!(
            "(PlaybackSession) guild {} left voice, {dropped} queued track(s) dropped",
            self.guild_id
        );
    }

    fn enqueue(&mut self, track: Track, at_top: bool) {
        debug!(
            "(PlaybackSession) guild {} queued '{}'{}",
            self.guild_id,
            track.title(),
            if at_top { " at top" } else { "" }
        );
        self.queue.push(track, at_top);
        self.check_queue();
    }

    fn skip(&mut self, count: usize) -> bool {
        let Some(now) = self.current.as_mut() else {
            return false;
        };
        if self.loop_mode == LoopMode::One {
            now.skipped = true;
        }
        let removed = self.queue.remove_front(count.max(1) - 1);
        debug!(
            "(PlaybackSession) guild {} skipping current and {removed} queued",
            self.guild_id
        );
        if let Some(link) = self.link.as_mut() {
            link.player.stop();
        }
        true
    }

    fn toggle_pause(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match self.player_status {
            PlayerStatus::Playing => link.player.pause(),
            PlayerStatus::Paused => link.player.unpause(),
            _ => false,
        }
    }

    fn set_loop_mode(&mut self, mode: LoopMode) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.loop_mode = mode;
        true
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            connected: self.link.is_some(),
            connection_status: self.connection_status,
            player_status: self.player_status,
            loop_mode: self.loop_mode,
            current: self.current.as_ref().map(|now| now.track.info()),
            queue: self.queue.infos(),
            elapsed_secs: self.clock.elapsed_secs(),
        }
    }

    // ----------------------------------------------------------------
    // Scheduler
    // ----------------------------------------------------------------

    fn check_queue(&mut self) {
        if self.awaiting_playback_ack
            || self.player_status != PlayerStatus::Idle
            || !self.connection_status.is_ready()
            || self.link.is_none()
        {
            return;
        }

        self.settle_failure();
        if let Some(finished) = self.current.take() {
            self.requeue(finished);
        }

        while let Some(mut track) = self.queue.pop_front() {
            let info = track.info();
            match self.start_track(&mut track) {
                Ok((failure, failure_signal)) => {
                    self.play_seq += 1;
                    let play_id = self.play_seq;
                    if let Some(signal) = failure_signal {
                        self.forward_failure(play_id, signal);
                    }
                    info!(
                        "(PlaybackSession) guild {} now playing '{}'",
                        self.guild_id, info.title
                    );
                    self.current = Some(NowPlaying {
                        track,
                        play_id,
                        failure,
                        skipped: false,
                        failed: false,
                    });
                    self.awaiting_playback_ack = true;
                    return;
                }
                Err(e) => {
                    warn!(
                        "(PlaybackSession) guild {} could not start '{}': {e}",
                        self.guild_id, info.title
                    );
                    self.notifier.track_error(&info, &e);
                    track.cleanup();
                }
            }
        }
        trace!("(PlaybackSession) guild {} queue exhausted", self.guild_id);
    }

    fn start_track(
        &mut self,
        track: &mut Track,
    ) -> Result<(FailureWatch, Option<oneshot::Receiver<ConversionFailure>>), Error> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| Error::Voice("not connected".into()))?;
        let mut stream = track.create_readable()?;
        let watch = stream.failure_watch();
        let signal = stream.take_failure_signal();
        link.player.play(PlayableStream::ogg_opus(stream))?;
        Ok((watch, signal))
    }

    fn requeue(&mut self, finished: NowPlaying) {
        let NowPlaying {
            mut track,
            skipped,
            failed,
            ..
        } = finished;
        track.cleanup();
        if failed {
            return;
        }
        match self.loop_mode {
            LoopMode::One if !skipped => self.queue.push_front(track),
            LoopMode::All => self.queue.push_back(track),
            _ => {}
        }
    }

    fn forward_failure(&self, play_id: u64, signal: oneshot::Receiver<ConversionFailure>) {
        let weak = self.weak_tx.clone();
        tokio::spawn(async move {
            // Err means the conversion ended without failing.
            if let Ok(failure) = signal.await {
                if let Some(tx) = weak.upgrade() {
                    let _ = tx.send(SessionMessage::TrackFailed { play_id, failure });
                }
            }
        });
    }

    /// Failure reported while the player may still be draining buffered audio.
    fn on_track_failed(&mut self, play_id: u64, failure: ConversionFailure) {
        if !self
            .current
            .as_ref()
            .is_some_and(|now| now.play_id == play_id)
        {
            return;
        }
        if self.report_failure(failure) {
            if let Some(link) = self.link.as_mut() {
                link.player.stop();
            }
        }
    }

    /// The player may reach the failed end of the stream before the failure
    /// signal reaches the inbox. Checked whenever the current track ends.
    fn settle_failure(&mut self) {
        let recorded = self.current.as_ref().and_then(|now| now.failure.get());
        if let Some(failure) = recorded {
            self.report_failure(failure);
        }
    }

    /// Notifies once per play. Returns false if already reported.
    fn report_failure(&mut self, failure: ConversionFailure) -> bool {
        let Some(now) = self.current.as_mut() else {
            return false;
        };
        if now.failed {
            return false;
        }
        now.failed = true;
        let info = now.track.info();
        let err = Error::from(failure);

        warn!(
            "(PlaybackSession) guild {} '{}' failed: {err}",
            self.guild_id, info.title
        );
        self.notifier.track_error(&info, &err);
        true
    }

    // ----------------------------------------------------------------
    // Voice transport events
    // ----------------------------------------------------------------

    fn event_sink(&self, epoch: u64) -> VoiceEventSink {
        let weak = self.weak_tx.clone();
        VoiceEventSink::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SessionMessage::Voice { epoch, event });
            }
        })
    }

    fn on_voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Connection(status) => self.on_connection_status(status),
            VoiceEvent::Player(status) => self.on_player_status(status),
            VoiceEvent::ConnectionError(e) => {
                warn!("(PlaybackSession) guild {} connection error: {e}", self.guild_id)
            }
            VoiceEvent::PlayerError(e) => {
                warn!("(PlaybackSession) guild {} player error: {e}", self.guild_id)
            }
        }
    }

    fn on_connection_status(&mut self, status: ConnectionStatus) {
        let previous = std::mem::replace(&mut self.connection_status, status);
        trace!(
            "(PlaybackSession) guild {} connection {previous} => {status}",
            self.guild_id
        );

        match status {
            ConnectionStatus::Disconnected(reason) => self.on_disconnected(reason),
            ConnectionStatus::Connecting | ConnectionStatus::Signalling => {
                self.start_negotiation_deadline()
            }
            ConnectionStatus::Ready => {
                self.negotiation = None;
                self.reconnect = None;
                self.check_queue();
            }
            ConnectionStatus::Destroyed => {
                if self.link.is_some() {
                    info!("(PlaybackSession) guild {} connection destroyed", self.guild_id);
                    self.leave_voice();
                }
            }
        }
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        if self.link.is_none() {
            return;
        }

        if reason.is_forcibly_ended() {
            // Usually a channel move; the gateway reconnects on its own.
            debug!(
                "(PlaybackSession) guild {} session closed by the gateway, waiting for reconnect",
                self.guild_id
            );
            let token = self.arm_timer(TimerKind::AwaitConnecting, self.config.reconnect_grace());
            self.reconnect = Some(token);
            return;
        }

        let attempts = self
            .link
            .as_ref()
            .map(|l| l.connection.rejoin_attempts())
            .unwrap_or(u32::MAX);
        if attempts < self.config.max_rejoin_attempts {
            debug!(
                "(PlaybackSession) guild {} disconnected ({reason:?}), rejoin attempt {} in {:?}",
                self.guild_id,
                attempts + 1,
                self.config.rejoin_backoff()
            );
            let token = self.arm_timer(TimerKind::RejoinBackoff, self.config.rejoin_backoff());
            self.reconnect = Some(token);
        } else {
            warn!(
                "(PlaybackSession) guild {} giving up after {attempts} rejoin attempt(s)",
                self.guild_id
            );
            self.leave_voice();
        }
    }

    fn on_player_status(&mut self, status: PlayerStatus) {
        let previous = std::mem::replace(&mut self.player_status, status);
        if previous == status {
            return;
        }
        trace!(
            "(PlaybackSession) guild {} player {previous} => {status}",
            self.guild_id
        );

        match (previous, status) {
            (_, PlayerStatus::Idle) => {
                self.settle_failure();
                if let Some(now) = self.current.as_mut() {
                    now.track.cleanup();
                }
                self.clock.reset();
                self.check_queue();
            }
            (PlayerStatus::Idle, PlayerStatus::Buffering) => {
                self.awaiting_playback_ack = false;
            }
            (PlayerStatus::Idle, PlayerStatus::Playing) => {
                self.awaiting_playback_ack = false;
                self.clock.start();
            }
            (PlayerStatus::Buffering, PlayerStatus::Playing) => self.clock.start(),
            (PlayerStatus::Playing, PlayerStatus::Paused) => self.clock.pause(),
            (PlayerStatus::Paused, PlayerStatus::Playing) => self.clock.resume(),
            _ => {}
        }
    }

    // ----------------------------------------------------------------
    // Timers
    // ----------------------------------------------------------------

    fn arm_timer(&mut self, kind: TimerKind, after: Duration) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        let weak = self.weak_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SessionMessage::Timer { token, kind });
            }
        });
        token
    }

    fn start_negotiation_deadline(&mut self) {
        if self.negotiation.is_none() {
            let token = self.arm_timer(TimerKind::Negotiation, self.config.connect_timeout());
            self.negotiation = Some(token);
        }
    }

    fn on_timer(&mut self, token: u64, kind: TimerKind) {
        match kind {
            TimerKind::Negotiation => {
                if self.negotiation != Some(token) {
                    return;
                }
                self.negotiation = None;
                if self.link.is_some() && !self.connection_status.is_ready() {
                    error!(
                        "(PlaybackSession) guild {} voice connection not ready after {:?}, leaving",
                        self.guild_id,
                        self.config.connect_timeout()
                    );
                    self.leave_voice();
                }
            }
            TimerKind::AwaitConnecting => {
                if self.reconnect != Some(token) {
                    return;
                }
                self.reconnect = None;
                if self.connection_status.is_disconnected() {
                    info!(
                        "(PlaybackSession) guild {} did not reconnect, leaving",
                        self.guild_id
                    );
                    self.leave_voice();
                }
            }
            TimerKind::RejoinBackoff => {
                if self.reconnect != Some(token) {
                    return;
                }
                self.reconnect = None;
                if !self.connection_status.is_disconnected() {
                    return;
                }
                let refused = self
                    .link
                    .as_mut()
                    .is_some_and(|link| !link.connection.rejoin(None));
                if refused {
                    warn!("(PlaybackSession) guild {} rejoin refused, leaving", self.guild_id);
                    self.leave_voice();
                }
            }
        }
    }
}
