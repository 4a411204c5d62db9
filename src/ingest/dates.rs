// src/ingest/dates.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

fn from_offset(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond()).single()
}

/// Parse a feed timestamp. Accepts RFC 2822 (RSS), RFC 3339 (Atom) and a few
/// sloppy variants seen in the wild. Returns `None` when nothing matches.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(dt) = OffsetDateTime::parse(s, &Rfc2822).ok().and_then(from_offset) {
        return Some(dt);
    }
    if let Some(dt) = OffsetDateTime::parse(s, &Rfc3339).ok().and_then(from_offset) {
        return Some(dt);
    }
    // chrono accepts obsolete zone names (GMT, EST, ...) that `time` rejects
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&n));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
}

/// First parseable candidate wins.
pub fn first_parseable(candidates: &[String]) -> Option<DateTime<Utc>> {
    candidates.iter().find_map(|c| parse_feed_date(c))
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

/// Human "time ago" label, computed once at normalization.
pub fn relative_time(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - published).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }
    let mins = secs / 60;
    if mins < 60 {
        return plural(mins, "minute");
    }
    let hours = mins / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = hours / 24;
    if days < 7 {
        return plural(days, "day");
    }
    published.format("%b %-d, %Y").to_string()
}
