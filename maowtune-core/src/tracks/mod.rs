// File: maowtune-core/src/tracks/mod.rs
//
// Queue entries: display metadata plus a lazily converted audio source.

use std::fmt;
use std::sync::Arc;

use maowtune_common::models::{AudioMetadata, MusicInfo, TrackOrigin, VideoInfo};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::Error;
use crate::converter::{ConversionEngine, ConversionId, ConvertedStream};
use crate::sources::{SourceFactory, tee_source};

pub const UNKNOWN_TRACK_TITLE: &str = "Unknown track";

/// A track from an arbitrary URL. Metadata is filled in by a probe running
/// alongside the first conversion.
#[derive(Debug, Clone)]
pub struct WebInfo {
    pub url: Url,
    metadata: Arc<RwLock<Option<AudioMetadata>>>,
}

impl WebInfo {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            metadata: Arc::new(RwLock::new(None)),
        }
    }

    pub fn metadata(&self) -> Option<AudioMetadata> {
        self.metadata.read().clone()
    }
}

#[derive(Debug, Clone)]
pub enum TrackKind {
    Video(VideoInfo),
    Music(MusicInfo),
    Web(WebInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackVariant {
    Video,
    Music,
    Web,
}

impl TrackKind {
    pub fn variant(&self) -> TrackVariant {
        match self {
            TrackKind::Video(_) => TrackVariant::Video,
            TrackKind::Music(_) => TrackVariant::Music,
            TrackKind::Web(_) => TrackVariant::Web,
        }
    }
}

/// Plain description of a track for replies and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub title: String,
    pub duration_secs: u64,
    pub link: String,
    pub variant: TrackVariant,
    pub origin: TrackOrigin,
}

pub struct Track {
    origin: TrackOrigin,
    kind: TrackKind,
    source: SourceFactory,
    engine: ConversionEngine,
    conversion: Option<ConversionId>,
}

impl Track {
    pub fn new(
        origin: TrackOrigin,
        kind: TrackKind,
        source: SourceFactory,
        engine: ConversionEngine,
    ) -> Self {
        Self {
            origin,
            kind,
            source,
            engine,
            conversion: None,
        }
    }

    pub fn video(
        origin: TrackOrigin,
        info: VideoInfo,
        source: SourceFactory,
        engine: ConversionEngine,
    ) -> Self {
        Self::new(origin, TrackKind::Video(info), source, engine)
    }

    pub fn music(
        origin: TrackOrigin,
        info: MusicInfo,
        source: SourceFactory,
        engine: ConversionEngine,
    ) -> Self {
        Self::new(origin, TrackKind::Music(info), source, engine)
    }

    /// Track streamed over HTTP from `url`.
    pub fn web(
        origin: TrackOrigin,
        url: Url,
        client: reqwest::Client,
        engine: ConversionEngine,
    ) -> Self {
        let source = SourceFactory::http(client, url.clone());
        Self::new(origin, TrackKind::Web(WebInfo::new(url)), source, engine)
    }

    pub fn origin(&self) -> &TrackOrigin {
        &self.origin
    }

    pub fn kind(&self) -> &TrackKind {
        &self.kind
    }

    pub fn conversion_id(&self) -> Option<ConversionId> {
        self.conversion
    }

    pub fn title(&self) -> String {
        let known = match &self.kind {
            TrackKind::Video(v) => Some(v.title.clone()),
            TrackKind::Music(m) => Some(m.title.clone()),
            TrackKind::Web(w) => w.metadata().and_then(|m| m.display_title()),
        };
        known
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string())
    }

    pub fn duration_secs(&self) -> u64 {
        match &self.kind {
            TrackKind::Video(v) => v.duration_secs,
            TrackKind::Music(m) => m.duration_secs,
            TrackKind::Web(w) => w.metadata().map(|m| m.duration_secs).unwrap_or(0),
        }
    }

    pub fn link(&self) -> String {
        match &self.kind {
            TrackKind::Video(v) => format!("https://youtu.be/{}", v.id),
            TrackKind::Music(m) => format!("https://music.yandex.com/track/{}", m.id),
            TrackKind::Web(w) => w.url.to_string(),
        }
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            title: self.title(),
            duration_secs: self.duration_secs(),
            link: self.link(),
            variant: self.kind.variant(),
            origin: self.origin.clone(),
        }
    }

    /// Opens the source once and starts converting it. Any conversion still
    /// held from an earlier attempt is aborted first.
    pub fn create_readable(&mut self) -> Result<ConvertedStream, Error> {
        self.cleanup();

        let raw = self.source.open();
        let raw = match &self.kind {
            TrackKind::Web(web) if web.metadata.read().is_none() => {
                let cfg = self.engine.config();
                let (primary, probe_side) =
                    tee_source(raw, cfg.source_buffer_bytes, cfg.probe_buffer_bytes);

                let engine = self.engine.clone();
                let slot = web.metadata.clone();
                let url = web.url.clone();
                tokio::spawn(async move {
                    match engine.probe_metadata(probe_side).await {
                        Ok(meta) => {
                            debug!("(Track) Probed {url}: {meta:?}");
                            *slot.write() = Some(meta);
                        }
                        Err(e) => warn!("(Track) Metadata probe failed for {url}: {e}"),
                    }
                });
                primary
            }
            _ => raw,
        };

        let handle = self.engine.convert(raw)?;
        self.conversion = Some(handle.id);
        Ok(handle.output)
    }

    /// Aborts the held conversion, if any. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(id) = self.conversion.take() {
            self.engine.abort(id);
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title())
            .field("variant", &self.kind.variant())
            .field("conversion", &self.conversion)
            .finish()
    }
}
