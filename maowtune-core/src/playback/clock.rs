// File: maowtune-core/src/playback/clock.rs

use std::time::Duration;

use tokio::time::Instant;

/// Play time of the current track, excluding pauses. Display only.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl PlaybackClock {
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
    }

    pub fn pause(&mut self) {
        if self.started_at.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += at.elapsed();
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        let current_pause = self.paused_at.map(|at| at.elapsed()).unwrap_or_default();
        start
            .elapsed()
            .saturating_sub(self.paused_total)
            .saturating_sub(current_pause)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }
}
