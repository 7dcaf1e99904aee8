// File: maowtune-core/src/config.rs
//
// JSON configuration for the transcoder and the playback sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Error;

/// Environment variable pointing at the config file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "maowtune.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub transcoder: TranscoderConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executables tried in order by `ConversionEngine::initialize`.
    pub candidates: Vec<String>,
    /// Bytes of converted audio buffered ahead of the player.
    pub output_buffer_bytes: usize,
    /// Bytes buffered for the playback half of a tee'd web source.
    pub source_buffer_bytes: usize,
    /// Bytes buffered for the probing half of a tee'd web source.
    pub probe_buffer_bytes: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            candidates: ["ffmpeg", "avconv", "./ffmpeg", "./avconv", "ffmpeg.exe", "./ffmpeg.exe"]
                .into_iter()
                .map(String::from)
                .collect(),
            output_buffer_bytes: 2 * 1024 * 1024,
            source_buffer_bytes: 10 * 1024 * 1024,
            probe_buffer_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a Connecting/Signalling connection may take to become ready.
    pub connect_timeout_secs: u64,
    /// How long to wait for the gateway to resume after a forced close.
    pub reconnect_grace_secs: u64,
    /// Delay before each manual rejoin.
    pub rejoin_backoff_secs: u64,
    pub max_rejoin_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            reconnect_grace_secs: 5,
            rejoin_backoff_secs: 5,
            max_rejoin_attempts: 5,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn rejoin_backoff(&self) -> Duration {
        Duration::from_secs(self.rejoin_backoff_secs)
    }
}

impl PlayerConfig {
    /// `explicit`, else `$CONFIG_PATH`, else `./maowtune.json`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Reads the config at `path`. A missing file is created with defaults.
    pub fn load_or_create(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            let config = PlayerConfig::default();
            config.write(path)?;
            info!("(Config) No config at {} => wrote defaults", path.display());
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.transcoder.candidates.is_empty() {
            return Err(Error::Config("transcoder.candidates must not be empty".into()));
        }
        if self.transcoder.output_buffer_bytes == 0 {
            return Err(Error::Config("transcoder.output_buffer_bytes must be > 0".into()));
        }
        if self.session.max_rejoin_attempts == 0 {
            warn!("(Config) session.max_rejoin_attempts is 0; dropped connections are never rejoined");
        }
        Ok(())
    }
}
