// ================================================================
// File: maowtune-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transcoder binary not found (tried: {0})")]
    TranscoderNotFound(String),

    #[error("Transcoder not initialized, call initialize() first")]
    TranscoderNotInitialized,

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Voice error: {0}")]
    Voice(String),

    #[error("Playback session for guild {0} is closed")]
    SessionClosed(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
