// File: maowtune-core/src/playback/manager.rs

use std::sync::Arc;

use dashmap::DashMap;
use maowtune_common::traits::VoiceTransport;
use tracing::{debug, info};
use twilight_model::id::Id;
use twilight_model::id::marker::GuildMarker;

use super::notify::PlaybackNotifier;
use super::session::PlaybackSession;
use crate::config::SessionConfig;
use crate::converter::ConversionEngine;

/// All guild sessions of one bot, sharing a transport, a notifier and the
/// conversion engine.
pub struct SessionManager {
    sessions: DashMap<Id<GuildMarker>, PlaybackSession>,
    transport: Arc<dyn VoiceTransport>,
    notifier: Arc<dyn PlaybackNotifier>,
    engine: ConversionEngine,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        notifier: Arc<dyn PlaybackNotifier>,
        engine: ConversionEngine,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            notifier,
            engine,
            config,
        }
    }

    pub fn engine(&self) -> &ConversionEngine {
        &self.engine
    }

    /// Returns the guild's session, starting one if there is none (or the
    /// previous one has stopped).
    pub fn get_or_create(&self, guild_id: Id<GuildMarker>) -> PlaybackSession {
        let mut entry = self.sessions.entry(guild_id).or_insert_with(|| {
            debug!("(SessionManager) creating session for guild {guild_id}");
            self.spawn_session(guild_id)
        });
        if entry.is_closed() {
            debug!("(SessionManager) session for guild {guild_id} had stopped, restarting");
            *entry = self.spawn_session(guild_id);
        }
        entry.value().clone()
    }

    pub fn get(&self, guild_id: Id<GuildMarker>) -> Option<PlaybackSession> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn_session(&self, guild_id: Id<GuildMarker>) -> PlaybackSession {
        PlaybackSession::spawn(
            guild_id,
            self.transport.clone(),
            self.notifier.clone(),
            self.config.clone(),
        )
    }

    /// Leaves voice everywhere, forgets all sessions and aborts every
    /// conversion still running.
    pub async fn shutdown(&self) {
        let sessions: Vec<PlaybackSession> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();

        for session in &sessions {
            if let Err(e) = session.leave_voice().await {
                debug!("(SessionManager) {e}");
            }
        }
        let aborted = self.engine.shutdown();
        info!(
            "(SessionManager) shut down {} session(s), {aborted} conversion(s) aborted",
            sessions.len()
        );
    }
}
