use chrono::{DateTime, Local, SecondsFormat, Utc};

/// Current time as a fixed-width ISO-8601 UTC string (millisecond precision),
/// so timestamps also sort correctly as plain strings.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wall-clock label shown next to an activity entry, e.g. `3:04:05 PM`.
/// Empty when the timestamp does not parse.
pub fn display_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| format_local(t.with_timezone(&Local)))
        .unwrap_or_default()
}

pub fn display_now() -> String {
    format_local(Local::now())
}

fn format_local(t: DateTime<Local>) -> String {
    t.format("%-I:%M:%S %p").to_string()
}

/// Lenient integer parse for CLI counters: leading sign and digits are used,
/// anything unparseable is 0.
pub fn parse_count(raw: &str) -> i64 {
    let trimmed = raw.trim();
    let digits_end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..digits_end].parse().unwrap_or(0)
}
