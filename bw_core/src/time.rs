// ABOUTME: Utilities for working with times and timestamps.
// ABOUTME: Canonical RFC3339 storage format, borg timestamp parsing, and monotonic timers.
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::time::{Duration, Instant};

/// Timestamp layouts borg emits without an offset
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Get the current UTC time
///
/// # Examples
///
/// ```
/// use bw_core::utc_now;
/// let now = utc_now();
/// assert!(now.timestamp() > 0);
/// ```
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in the canonical storage form (second precision, `Z` suffix)
///
/// Every timestamp column is written through this so that lexical ordering in
/// SQLite matches chronological ordering.
///
/// # Examples
///
/// ```
/// use bw_core::to_rfc3339;
/// use chrono::{TimeZone, Utc};
///
/// let time = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
/// assert_eq!(to_rfc3339(time), "2021-01-01T00:00:00Z");
/// ```
pub fn to_rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Get current time as an RFC3339 formatted string
pub fn now_iso8601() -> String {
    to_rfc3339(utc_now())
}

/// Parse a timestamp as reported by borg or as stored by us
///
/// Offset-less values are taken as UTC.
///
/// # Examples
///
/// ```
/// use bw_core::parse_timestamp;
/// let ts = parse_timestamp("2024-01-15T10:30:00.000000").unwrap();
/// assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00+00:00");
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Create a monotonic duration measurer
///
/// # Examples
///
/// ```
/// use bw_core::MonotonicTimer;
/// let timer = MonotonicTimer::new();
/// assert!(timer.elapsed() < std::time::Duration::from_secs(5));
/// ```
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since creation
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Reset the timer to now
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}
