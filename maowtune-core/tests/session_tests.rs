// tests/session_tests.rs
#![cfg(unix)]

mod test_utils;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use twilight_model::id::Id;

use maowtune_common::models::{ConnectionStatus, DisconnectReason, LoopMode, PlayerStatus};
use maowtune_core::Error;
use maowtune_core::config::SessionConfig;
use maowtune_core::playback::{LogNotifier, SessionManager};
use maowtune_core::sources::{SourceFactory, SourceStream, memory_source};
use maowtune_core::test_utils::{FakeVoiceTransport, VoiceCall};
use maowtune_core::tracks::Track;

use test_utils::*;

#[tokio::test]
async fn test_enqueue_order_and_queue_top() -> Result<(), Error> {
    let h = connected_harness().await;

    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;
    let snap = h.session.snapshot().await?;
    assert_eq!(current_title(&snap).as_deref(), Some("A"));
    assert_eq!(queue_titles(&snap), ["B"]);

    h.session.enqueue(video_track(&h.engine, "C"), true).await?;
    assert_eq!(queue_titles(&h.session.snapshot().await?), ["C", "B"]);

    h.transport.finish_current();
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("C")).await;
    assert_eq!(queue_titles(&snap), ["B"]);

    h.transport.finish_current();
    wait_for(&h.session, |s| current_title(s).as_deref() == Some("B")).await;

    h.transport.finish_current();
    let snap = wait_for(&h.session, |s| s.current.is_none()).await;
    assert!(snap.queue.is_empty());
    assert_eq!(h.transport.play_count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_only_one_track_plays_while_queue_grows() -> Result<(), Error> {
    let h = connected_harness().await;
    for title in ["A", "B", "C", "D", "E"] {
        h.session.enqueue(video_track(&h.engine, title), false).await?;
    }
    let snap = h.session.snapshot().await?;
    assert_eq!(current_title(&snap).as_deref(), Some("A"));
    assert_eq!(snap.queue.len(), 4);
    assert_eq!(h.transport.play_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_loop_one_replays_finished_track() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;
    assert!(h.session.set_loop_mode(LoopMode::One).await?);

    h.transport.finish_current();
    let snap = wait_for(&h.session, |_| h.transport.play_count() == 2).await;
    assert_eq!(current_title(&snap).as_deref(), Some("A"));
    assert_eq!(queue_titles(&snap), ["B"]);
    assert_eq!(snap.loop_mode, LoopMode::One);
    Ok(())
}

#[tokio::test]
async fn test_loop_all_moves_finished_track_to_tail() -> Result<(), Error> {
    let h = connected_harness().await;
    for title in ["A", "B", "C"] {
        h.session.enqueue(video_track(&h.engine, title), false).await?;
    }
    assert!(h.session.set_loop_mode(LoopMode::All).await?);

    h.transport.finish_current();
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("B")).await;
    assert_eq!(queue_titles(&snap), ["C", "A"]);
    Ok(())
}

#[tokio::test]
async fn test_loop_none_drops_finished_track() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;

    h.transport.finish_current();
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("B")).await;
    assert!(snap.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_skip_three_removes_two_queued() -> Result<(), Error> {
    let h = connected_harness().await;
    for title in ["A", "B", "C", "D", "E", "F"] {
        h.session.enqueue(video_track(&h.engine, title), false).await?;
    }
    assert_eq!(h.session.snapshot().await?.queue.len(), 5);

    assert!(h.session.skip(3).await?);
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("D")).await;
    assert_eq!(queue_titles(&snap), ["E", "F"]);
    Ok(())
}

#[tokio::test]
async fn test_skip_under_loop_one_moves_on() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;
    assert!(h.session.set_loop_mode(LoopMode::One).await?);

    assert!(h.session.skip(1).await?);
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("B")).await;
    assert!(snap.queue.is_empty());

    // B is not skipped, so it loops.
    h.transport.finish_current();
    let snap = wait_for(&h.session, |_| h.transport.play_count() == 3).await;
    assert_eq!(current_title(&snap).as_deref(), Some("B"));
    Ok(())
}

#[tokio::test]
async fn test_failing_source_is_reported_and_skipped() -> Result<(), Error> {
    let mut h = connected_harness().await;
    h.session.enqueue(failing_track(&h.engine, "broken"), false).await?;
    h.session.enqueue(video_track(&h.engine, "good"), false).await?;

    let notice = tokio::time::timeout(Duration::from_secs(5), h.notices.recv())
        .await
        .expect("notice in time")
        .expect("notice sent");
    assert_eq!(notice.track.title, "broken");
    assert!(notice.message.contains("host unreachable"));

    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("good")).await;
    assert!(snap.queue.is_empty());
    assert!(h.notices.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_failed_track_is_not_looped() -> Result<(), Error> {
    let mut h = connected_harness().await;
    let (feed, rx) = mpsc::channel::<io::Result<Bytes>>(4);
    let rx = std::sync::Mutex::new(Some(rx));
    let source = SourceFactory::new(move || match rx.lock().unwrap().take() {
        Some(rx) => Box::new(StreamReader::new(ReceiverStream::new(rx))) as SourceStream,
        None => memory_source(Bytes::from_static(b"again")),
    });
    let track = Track::video(origin(), video("flaky"), source, h.engine.clone());

    h.session.enqueue(track, false).await?;
    assert!(h.session.set_loop_mode(LoopMode::All).await?);

    // The connection drops mid-stream.
    feed.send(Ok(Bytes::from_static(b"some audio"))).await.unwrap();
    feed.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")))
        .await
        .unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(5), h.notices.recv())
        .await
        .expect("notice in time")
        .expect("notice sent");
    assert_eq!(notice.track.title, "flaky");

    let snap = wait_for(&h.session, |s| s.current.is_none()).await;
    assert!(snap.queue.is_empty());
    assert_eq!(h.transport.play_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_refused_stream_moves_to_next_track() -> Result<(), Error> {
    let mut h = connected_harness().await;
    h.transport.set_fail_play(true);
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;

    let first = h.notices.recv().await.expect("first notice");
    let second = h.notices.recv().await.expect("second notice");
    assert_eq!(first.track.title, "A");
    assert_eq!(second.track.title, "B");

    let snap = h.session.snapshot().await?;
    assert!(snap.current.is_none());
    assert!(snap.queue.is_empty());
    assert_eq!(h.engine.in_flight(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_seen_by_player_first_is_still_reported() -> Result<(), Error> {
    // The player hits the read error and goes Idle on its own, racing the
    // engine's failure signal. Either order must report exactly once.
    for round in 0..50 {
        let mut h = draining_harness().await;
        h.session.enqueue(failing_track(&h.engine, "broken"), false).await?;

        let notice = tokio::time::timeout(Duration::from_secs(5), h.notices.recv())
            .await
            .unwrap_or_else(|_| panic!("no notice in round {round}"))
            .expect("notice sent");
        assert_eq!(notice.track.title, "broken");
        assert!(notice.message.contains("host unreachable"));

        let snap = wait_for(&h.session, |s| s.current.is_none()).await;
        assert!(snap.queue.is_empty());
        assert!(h.notices.try_recv().is_err(), "reported twice in round {round}");
    }
    Ok(())
}

#[tokio::test]
async fn test_draining_player_sees_the_source_error() -> Result<(), Error> {
    let mut h = draining_harness().await;
    h.session.enqueue(failing_track(&h.engine, "broken"), false).await?;
    h.session.enqueue(video_track(&h.engine, "good"), false).await?;

    let notice = h.notices.recv().await.expect("notice sent");
    assert_eq!(notice.track.title, "broken");

    // "good" plays out and the queue drains.
    wait_for(&h.session, |s| s.current.is_none() && s.queue.is_empty()).await;
    assert_eq!(h.transport.play_count(), 2);
    for _ in 0..400 {
        if !h.transport.read_errors().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.transport.read_errors(), [io::ErrorKind::ConnectionRefused]);
    assert!(h.notices.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_failed_track_dropped_under_loop_one() -> Result<(), Error> {
    let mut h = draining_harness().await;
    h.session.enqueue(pending_track(&h.engine, "A"), false).await?;
    assert!(h.session.set_loop_mode(LoopMode::One).await?);
    h.session.enqueue(failing_track(&h.engine, "B"), false).await?;

    assert!(h.session.skip(1).await?);
    let notice = tokio::time::timeout(Duration::from_secs(5), h.notices.recv())
        .await
        .expect("notice in time")
        .expect("notice sent");
    assert_eq!(notice.track.title, "B");

    let snap = wait_for(&h.session, |s| s.current.is_none()).await;
    assert!(snap.queue.is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.play_count(), 2);
    assert!(h.notices.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_failed_track_dropped_under_loop_all() -> Result<(), Error> {
    let mut h = draining_harness().await;
    h.session.enqueue(pending_track(&h.engine, "A"), false).await?;
    assert!(h.session.set_loop_mode(LoopMode::All).await?);
    h.session.enqueue(failing_track(&h.engine, "B"), false).await?;

    // A goes to the tail, B plays and fails, A comes back alone.
    assert!(h.session.skip(1).await?);
    let notice = tokio::time::timeout(Duration::from_secs(5), h.notices.recv())
        .await
        .expect("notice in time")
        .expect("notice sent");
    assert_eq!(notice.track.title, "B");

    wait_for(&h.session, |s| {
        current_title(s).as_deref() == Some("A") && s.queue.is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.play_count(), 3);
    assert!(h.notices.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_no_second_play_before_ack() -> Result<(), Error> {
    let transport = FakeVoiceTransport::new();
    transport.set_defer_ack(true);
    let h = harness_with(transport, SessionConfig::default());
    h.session.join_voice(channel(), false).await?;

    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;
    assert_eq!(h.transport.play_count(), 1);

    // Both re-run the scheduler while the player is still Idle.
    h.transport.emit_connection(ConnectionStatus::Ready);
    h.session.enqueue(video_track(&h.engine, "C"), false).await?;

    let snap = h.session.snapshot().await?;
    assert_eq!(current_title(&snap).as_deref(), Some("A"));
    assert_eq!(queue_titles(&snap), ["B", "C"]);
    assert_eq!(h.transport.play_count(), 1);

    h.transport.emit_player(PlayerStatus::Buffering);
    h.transport.emit_player(PlayerStatus::Playing);
    let snap = h.session.snapshot().await?;
    assert_eq!(snap.player_status, PlayerStatus::Playing);
    assert_eq!(h.transport.play_count(), 1);

    h.transport.finish_current();
    let snap = wait_for(&h.session, |s| current_title(s).as_deref() == Some("B")).await;
    assert_eq!(queue_titles(&snap), ["C"]);
    assert_eq!(h.transport.play_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_leave_clears_everything() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    h.session.enqueue(video_track(&h.engine, "B"), false).await?;

    h.session.leave_voice().await?;
    let snap = h.session.snapshot().await?;
    assert!(!snap.connected);
    assert!(snap.current.is_none());
    assert!(snap.queue.is_empty());
    assert_eq!(snap.channel_id, None);
    assert_eq!(h.engine.in_flight(), 0);

    let calls = h.transport.calls();
    assert!(calls.contains(&VoiceCall::Stop));
    assert!(calls.contains(&VoiceCall::Disconnect));
    assert!(calls.contains(&VoiceCall::Destroy));

    // Enqueueing while disconnected only queues.
    h.session.enqueue(video_track(&h.engine, "C"), false).await?;
    let snap = h.session.snapshot().await?;
    assert!(snap.current.is_none());
    assert_eq!(queue_titles(&snap), ["C"]);
    Ok(())
}

#[tokio::test]
async fn test_join_is_idempotent_unless_forced() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.join_voice(channel(), false).await?;
    assert_eq!(h.transport.count(&VoiceCall::Join(channel())), 1);

    let other = Id::new(CHANNEL + 1);
    h.session.join_voice(other, true).await?;
    assert_eq!(h.transport.count(&VoiceCall::Rejoin(Some(other))), 1);

    let snap = wait_for(&h.session, |s| s.connection_status.is_ready()).await;
    assert_eq!(snap.channel_id, Some(other));
    assert!(snap.connected);
    Ok(())
}

#[tokio::test]
async fn test_failed_join_leaves_session_disconnected() -> Result<(), Error> {
    let transport = FakeVoiceTransport::new();
    transport.set_fail_join(true);
    let h = harness_with(transport, SessionConfig::default());

    let res = h.session.join_voice(channel(), false).await;
    assert!(matches!(res, Err(Error::Voice(_))));
    assert!(!h.session.snapshot().await?.connected);
    Ok(())
}

#[tokio::test]
async fn test_destroyed_connection_leaves() -> Result<(), Error> {
    let h = connected_harness().await;
    h.session.enqueue(video_track(&h.engine, "A"), false).await?;

    h.transport.emit_connection(ConnectionStatus::Destroyed);
    let snap = wait_for(&h.session, |s| !s.connected).await;
    assert!(snap.current.is_none());
    assert_eq!(h.engine.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_gives_up_after_max_attempts() -> Result<(), Error> {
    let h = connected_harness().await;
    h.transport.set_rejoin_fails(true);

    h.transport.emit_connection(ConnectionStatus::Disconnected(
        DisconnectReason::WebSocketClose { code: 4006 },
    ));

    // Five backoffs of five seconds, with room to spare.
    tokio::time::sleep(Duration::from_secs(60)).await;

    let snap = h.session.snapshot().await?;
    assert!(!snap.connected);
    assert_eq!(h.transport.rejoin_count(), 5);
    assert!(h.transport.calls().contains(&VoiceCall::Destroy));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_channel_moves_do_not_count_as_rejoins() -> Result<(), Error> {
    let config = SessionConfig {
        max_rejoin_attempts: 1,
        ..Default::default()
    };
    let h = harness_with(FakeVoiceTransport::manual(), config);
    h.session.join_voice(channel(), false).await?;
    h.transport.emit_connection(ConnectionStatus::Ready);

    // Moves that never reach Ready.
    for offset in 1..=3 {
        h.session.join_voice(Id::new(CHANNEL + offset), true).await?;
    }
    h.transport.emit_connection(ConnectionStatus::Disconnected(
        DisconnectReason::WebSocketClose { code: 4006 },
    ));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(h.transport.count(&VoiceCall::Rejoin(None)), 1);
    assert!(h.session.snapshot().await?.connected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_recovers_connection() -> Result<(), Error> {
    let h = connected_harness().await;

    h.transport.emit_connection(ConnectionStatus::Disconnected(DisconnectReason::EndpointRemoved));
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.transport.rejoin_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.transport.rejoin_count(), 1);

    let snap = h.session.snapshot().await?;
    assert!(snap.connected);
    assert!(snap.connection_status.is_ready());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_forced_close_waits_then_leaves() -> Result<(), Error> {
    let h = connected_harness().await;

    h.transport.emit_connection(ConnectionStatus::Disconnected(
        DisconnectReason::WebSocketClose { code: 4014 },
    ));
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(h.session.snapshot().await?.connected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.session.snapshot().await?.connected);
    assert_eq!(h.transport.rejoin_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_forced_close_then_reconnect_stays() -> Result<(), Error> {
    let h = connected_harness().await;

    h.transport.emit_connection(ConnectionStatus::Disconnected(
        DisconnectReason::WebSocketClose { code: 4014 },
    ));
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.transport.emit_connection(ConnectionStatus::Connecting);
    h.transport.emit_connection(ConnectionStatus::Ready);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snap = h.session.snapshot().await?;
    assert!(snap.connected);
    assert!(snap.connection_status.is_ready());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_deadline() -> Result<(), Error> {
    let h = harness_with(FakeVoiceTransport::manual(), SessionConfig::default());
    h.session.join_voice(channel(), false).await?;

    tokio::time::sleep(Duration::from_secs(19)).await;
    let snap = h.session.snapshot().await?;
    assert!(snap.connected);
    assert_eq!(snap.connection_status, ConnectionStatus::Signalling);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.session.snapshot().await?.connected);
    assert!(h.transport.calls().contains(&VoiceCall::Destroy));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ready_before_deadline_keeps_connection() -> Result<(), Error> {
    let h = harness_with(FakeVoiceTransport::manual(), SessionConfig::default());
    h.session.join_voice(channel(), false).await?;

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.transport.emit_connection(ConnectionStatus::Ready);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let snap = h.session.snapshot().await?;
    assert!(snap.connected);
    assert!(snap.connection_status.is_ready());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_excludes_pauses() -> Result<(), Error> {
    let h = connected_harness().await;
    assert!(!h.session.toggle_pause().await?);

    h.session.enqueue(video_track(&h.engine, "A"), false).await?;
    let snap = h.session.snapshot().await?;
    assert_eq!(snap.player_status, PlayerStatus::Playing);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.session.toggle_pause().await?);
    let snap = h.session.snapshot().await?;
    assert_eq!(snap.player_status, PlayerStatus::Paused);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.session.snapshot().await?.elapsed_secs, 10);

    assert!(h.session.toggle_pause().await?);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snap = h.session.snapshot().await?;
    assert_eq!(snap.player_status, PlayerStatus::Playing);
    assert_eq!(snap.elapsed_secs, 15);
    Ok(())
}

#[tokio::test]
async fn test_manager_reuses_sessions_and_shuts_down() -> Result<(), Error> {
    let transport = FakeVoiceTransport::new();
    let engine = cat_engine();
    let manager = SessionManager::new(
        Arc::new(transport.clone()),
        Arc::new(LogNotifier),
        engine.clone(),
        SessionConfig::default(),
    );

    let first = manager.get_or_create(guild());
    let again = manager.get_or_create(guild());
    let other = manager.get_or_create(Id::new(GUILD + 1));
    assert!(first.is_same(&again));
    assert!(!first.is_same(&other));
    assert_eq!(manager.len(), 2);

    first.join_voice(channel(), false).await?;
    first.enqueue(video_track(&engine, "A"), false).await?;
    assert!(first.snapshot().await?.current.is_some());

    manager.shutdown().await;
    assert!(manager.is_empty());
    assert_eq!(engine.in_flight(), 0);
    assert!(transport.calls().contains(&VoiceCall::Destroy));
    assert!(manager.get(guild()).is_none());
    Ok(())
}
