use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, UserMarker};

/// What happens to a track once it finishes playing on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Finished tracks are dropped.
    #[default]
    None,
    /// The finished track goes back to the head of the queue.
    One,
    /// The finished track goes to the tail of the queue.
    All,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopMode::None => "none",
            LoopMode::One => "one",
            LoopMode::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "one" | "single" => Ok(LoopMode::One),
            "all" | "queue" => Ok(LoopMode::All),
            other => Err(format!("Unknown loop mode: {other}")),
        }
    }
}

/// Who asked for a track and where replies about it should go.
///
/// The playback core never looks inside this; it only hands it back
/// alongside error notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOrigin {
    pub user_id: Id<UserMarker>,
    pub channel_id: Id<ChannelMarker>,
    pub display_name: String,
}

/// Description of a video fetched from the video platform before enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub channel_title: String,
    pub duration_secs: u64,
    pub thumbnail_url: Option<String>,
}

/// Description of a track fetched from the music-streaming service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicInfo {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub duration_secs: u64,
    pub cover_uri: Option<String>,
}

/// Result of a metadata probe. Empty strings / zero mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub artist: String,
    pub title: String,
    pub duration_secs: u64,
}

impl AudioMetadata {
    /// "artist - title" when both are known, otherwise whichever one is.
    pub fn display_title(&self) -> Option<String> {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => Some(format!("{} - {}", self.artist, self.title)),
            (true, false) => Some(self.title.clone()),
            (false, true) => Some(self.artist.clone()),
            (true, true) => None,
        }
    }
}
