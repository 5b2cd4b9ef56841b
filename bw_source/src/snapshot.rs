//! ABOUTME: Loosely typed snapshot of one repository as the backup tool reports it
//! ABOUTME: Nothing here is trusted; the collector validates it into store records

use serde::{Deserialize, Serialize};

/// Everything observed about one repository in a single fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub repository: RawRepository,
    /// Archives in the order the tool listed them (oldest first for borg)
    pub archives: Vec<RawArchive>,
    pub stats: CacheCounters,
    /// Present only when the borgmatic configuration could be read
    pub configuration: Option<SourceConfiguration>,
    /// Dumps found in the newest archive; empty when not collected
    pub database_dumps: Vec<DatabaseDump>,
}

impl SourceSnapshot {
    /// The newest archive by position, which is how borg orders `info` output
    pub fn newest_archive(&self) -> Option<&RawArchive> {
        self.archives.last()
    }
}

/// Repository description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRepository {
    /// Borg-assigned repository id
    pub id: Option<String>,
    pub location: Option<String>,
    pub encryption_mode: Option<String>,
    pub size_on_disk_bytes: Option<i64>,
    pub last_modified: Option<String>,
}

/// One archive entry; any field may be missing or unusable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawArchive {
    pub name: Option<String>,
    #[serde(alias = "id")]
    pub hash: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub stats: ArchiveCounters,
    /// Set when the entry could not be decoded at all
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RawArchive {
    /// Placeholder for an entry that failed to decode, keeping whatever name was readable
    pub fn undecodable(name: Option<String>, error: impl Into<String>) -> Self {
        Self {
            name,
            decode_error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Per-archive size counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCounters {
    pub original_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub deduplicated_size: Option<i64>,
    #[serde(alias = "nfiles")]
    pub file_count: Option<i64>,
}

/// Chunk cache counters for the whole repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub total_chunks: Option<i64>,
    pub unique_chunks: Option<i64>,
    pub total_csize: Option<i64>,
    pub unique_csize: Option<i64>,
}

/// Read-only passthrough of the borgmatic configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfiguration {
    /// `None` when the configuration does not list source directories
    pub source_directories: Option<Vec<String>>,
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    pub keep_daily: Option<i64>,
    pub keep_weekly: Option<i64>,
    pub keep_monthly: Option<i64>,
    pub keep_yearly: Option<i64>,
    pub keep_within: Option<String>,
}

/// A database dump file stored inside an archive by borgmatic hooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDump {
    /// `postgresql`, `mariadb`, `mysql`, ...
    pub database_type: String,
    pub database_name: String,
    pub hostname: Option<String>,
    pub size_bytes: i64,
    pub path: String,
}
