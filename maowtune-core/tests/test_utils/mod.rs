// File: maowtune-core/tests/test_utils/mod.rs
//
// Shared setup for the integration tests. Each test binary uses a subset.
#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use maowtune_common::models::{TrackOrigin, VideoInfo};
use maowtune_core::config::{SessionConfig, TranscoderConfig};
use maowtune_core::converter::{ConversionEngine, TranscoderCommand};
use maowtune_core::playback::{ChannelNotifier, PlaybackSession, SessionSnapshot, TrackErrorNotice};
use maowtune_core::sources::{SourceFactory, SourceStream, failed_source};
use maowtune_core::test_utils::FakeVoiceTransport;
use maowtune_core::tracks::Track;

pub const GUILD: u64 = 100;
pub const CHANNEL: u64 = 200;

pub fn guild() -> Id<GuildMarker> {
    Id::new(GUILD)
}

pub fn channel() -> Id<ChannelMarker> {
    Id::new(CHANNEL)
}

/// `cat` copies input to output, which is all a transcoder needs to do for
/// the pipeline to be exercised.
pub fn cat_engine() -> ConversionEngine {
    let cat = TranscoderCommand::custom("cat", Vec::<String>::new(), Vec::<String>::new());
    ConversionEngine::with_command(TranscoderConfig::default(), cat)
}

/// Converts with `cat`; probing swallows the input and prints `diagnostics`
/// to stderr.
pub fn scripted_engine(diagnostics: &str) -> ConversionEngine {
    let script = format!("cat > /dev/null; printf '{diagnostics}' >&2");
    let cmd = TranscoderCommand::custom("sh", ["-c", "cat"], ["-c", script.as_str()]);
    ConversionEngine::with_command(TranscoderConfig::default(), cmd)
}

pub fn origin() -> TrackOrigin {
    TrackOrigin {
        user_id: Id::new(1),
        channel_id: Id::new(2),
        display_name: "tester".into(),
    }
}

pub fn video(title: &str) -> VideoInfo {
    VideoInfo {
        id: format!("id-{title}"),
        title: title.to_string(),
        channel_title: "channel".into(),
        duration_secs: 60,
        thumbnail_url: None,
    }
}

pub fn video_track(engine: &ConversionEngine, title: &str) -> Track {
    let source = SourceFactory::memory(format!("audio of {title}").into_bytes());
    Track::video(origin(), video(title), source, engine.clone())
}

/// A track whose source fails before producing any data.
pub fn failing_track(engine: &ConversionEngine, title: &str) -> Track {
    let source = SourceFactory::new(|| {
        failed_source(io::Error::new(io::ErrorKind::ConnectionRefused, "host unreachable"))
    });
    Track::video(origin(), video(title), source, engine.clone())
}

/// A track whose source never produces data nor ends.
pub fn pending_track(engine: &ConversionEngine, title: &str) -> Track {
    let source = SourceFactory::new(|| {
        Box::new(StreamReader::new(
            futures_util::stream::pending::<io::Result<Bytes>>(),
        )) as SourceStream
    });
    Track::video(origin(), video(title), source, engine.clone())
}

pub fn current_title(snap: &SessionSnapshot) -> Option<String> {
    snap.current.as_ref().map(|t| t.title.clone())
}

pub fn queue_titles(snap: &SessionSnapshot) -> Vec<String> {
    snap.queue.iter().map(|t| t.title.clone()).collect()
}

pub struct Harness {
    pub session: PlaybackSession,
    pub transport: FakeVoiceTransport,
    pub engine: ConversionEngine,
    pub notices: mpsc::UnboundedReceiver<TrackErrorNotice>,
}

pub fn harness_with(transport: FakeVoiceTransport, config: SessionConfig) -> Harness {
    let (notifier, notices) = ChannelNotifier::new();
    let session =
        PlaybackSession::spawn(guild(), Arc::new(transport.clone()), Arc::new(notifier), config);
    Harness {
        session,
        transport,
        engine: cat_engine(),
        notices,
    }
}

/// Session already joined to `channel()` on a transport that goes Ready
/// right away.
pub async fn connected_harness() -> Harness {
    let h = harness_with(FakeVoiceTransport::new(), SessionConfig::default());
    h.session.join_voice(channel(), false).await.expect("join");
    h
}

/// Connected session whose player reads each stream to its end and goes
/// Idle by itself, as a real player does.
pub async fn draining_harness() -> Harness {
    let transport = FakeVoiceTransport::new();
    transport.set_drain_streams(true);
    let h = harness_with(transport, SessionConfig::default());
    h.session.join_voice(channel(), false).await.expect("join");
    h
}

/// Polls snapshots until `pred` holds.
pub async fn wait_for<F>(session: &PlaybackSession, mut pred: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    for _ in 0..400 {
        let snap = session.snapshot().await.expect("session alive");
        if pred(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held; last snapshot: {:?}", session.snapshot().await);
}
