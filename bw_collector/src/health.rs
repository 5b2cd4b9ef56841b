//! ABOUTME: Three-state repository health from the age of the newest archive
//! ABOUTME: Pure and evaluated at read time; nothing here is persisted

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Below this age a repository is healthy
pub const WARNING_AFTER_HOURS: i64 = 24;
/// At or above this age a repository is critical
pub const CRITICAL_AFTER_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a repository by its last archive time
///
/// ```
/// use bw_collector::health::{evaluate, HealthStatus};
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// assert_eq!(evaluate(None, now), HealthStatus::Critical);
/// assert_eq!(evaluate(Some(now - Duration::hours(30)), now), HealthStatus::Warning);
/// ```
pub fn evaluate(last_archive_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> HealthStatus {
    let Some(last) = last_archive_time else {
        return HealthStatus::Critical;
    };

    // A timestamp ahead of the clock is treated as brand new.
    let age = now.signed_duration_since(last).max(Duration::zero());
    if age < Duration::hours(WARNING_AFTER_HOURS) {
        HealthStatus::Healthy
    } else if age < Duration::hours(CRITICAL_AFTER_HOURS) {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

/// Hours since the last archive, floored at zero
pub fn hours_since(last_archive_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = now.signed_duration_since(last_archive_time).num_seconds().max(0);
    seconds as f64 / 3600.0
}
