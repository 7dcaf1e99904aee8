// File: maowtune-core/src/utils/time.rs

/// Convert a clock string (`HH:MM:SS`, `MM:SS` or `SS`, fractional seconds
/// dropped) to total seconds using positional radix-60 weighting.
pub fn parse_clock_time(text: &str) -> Option<u64> {
    let whole = text.trim().split('.').next()?;
    if whole.is_empty() {
        return None;
    }
    whole.split(':').try_fold(0u64, |acc, part| {
        let value: u64 = part.parse().ok()?;
        acc.checked_mul(60)?.checked_add(value)
    })
}

/// `mm:ss`, or `hh:mm:ss` once an hour is reached.
pub fn format_time_span(seconds: u64) -> String {
    let s = seconds % 60;
    let m = (seconds / 60) % 60;
    let h = seconds / 3600;
    if h == 0 {
        format!("{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}

/// Human readable byte count, e.g. `1.50 MB`.
pub fn format_size(bytes: u64) -> String {
    const POSTFIXES: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut index = 0;
    while value >= 1024.0 && index < POSTFIXES.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    if value.fract() == 0.0 {
        format!("{} {}", value as u64, POSTFIXES[index])
    } else {
        format!("{:.2} {}", value, POSTFIXES[index])
    }
}
