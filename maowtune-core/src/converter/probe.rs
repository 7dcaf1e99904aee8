// File: maowtune-core/src/converter/probe.rs
//
// Parsing of the transcoder's diagnostic output when run in analyze-only mode.

use maowtune_common::models::AudioMetadata;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::time::parse_clock_time;

static ARTIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*artist[ \t]*:[ \t]*(.*?)[ \t\r]*$").expect("artist pattern")
});
static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^[ \t]*title[ \t]*:[ \t]*(.*?)[ \t\r]*$").expect("title pattern")
});
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Duration:\s*|time=)(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("duration pattern")
});

fn first_tag(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extracts tags and the duration from diagnostic text.
///
/// Tags take their first non-empty occurrence. Durations come from both the
/// `Duration:` header and the `time=` progress lines; the last one wins,
/// since the header is only an estimate for streamed input.
pub fn parse_probe_output(text: &str) -> AudioMetadata {
    let duration_secs = DURATION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| parse_clock_time(m.as_str()))
        .last()
        .unwrap_or(0);

    AudioMetadata {
        artist: first_tag(&ARTIST_RE, text).unwrap_or_default(),
        title: first_tag(&TITLE_RE, text).unwrap_or_default(),
        duration_secs,
    }
}
