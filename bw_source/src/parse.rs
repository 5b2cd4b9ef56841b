//! ABOUTME: Parsers for borgmatic info JSON, archive listings, and YAML configuration
//! ABOUTME: Shared by every invocation variant so they agree on payload shape

use crate::snapshot::{
    CacheCounters, DatabaseDump, RawArchive, RawRepository, RetentionSettings,
    SourceConfiguration, SourceSnapshot,
};
use bw_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use serde_yaml::{Mapping, Value as YamlValue};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct InfoEntry {
    repository: InfoRepository,
    #[serde(default)]
    encryption: Option<InfoEncryption>,
    #[serde(default)]
    cache: Option<InfoCache>,
    #[serde(default)]
    archives: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct InfoRepository {
    id: Option<String>,
    location: Option<String>,
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoEncryption {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoCache {
    #[serde(default)]
    stats: InfoCacheStats,
}

#[derive(Debug, Default, Deserialize)]
struct InfoCacheStats {
    total_chunks: Option<i64>,
    total_unique_chunks: Option<i64>,
    total_csize: Option<i64>,
    unique_csize: Option<i64>,
}

/// Parse `borgmatic info --json` output into a snapshot for `location`
///
/// borgmatic prints one entry per repository it touched; the entry whose
/// location matches is used. A lone entry is taken as-is, since borgmatic may
/// report a location spelled differently from the configured one. Archives
/// are decoded one by one so a single bad entry cannot hide its siblings.
pub fn parse_info(output: &str, location: &str) -> Result<SourceSnapshot> {
    let entries: Vec<Value> = serde_json::from_str(output.trim())
        .map_err(|e| Error::MalformedSnapshot(format!("info output is not a JSON array: {}", e)))?;

    let entry = entries
        .iter()
        .find(|entry| {
            entry
                .pointer("/repository/location")
                .and_then(Value::as_str)
                .is_some_and(|l| l == location)
        })
        .or_else(|| match entries.as_slice() {
            [only] => Some(only),
            _ => None,
        })
        .ok_or_else(|| match entries.len() {
            0 => Error::MalformedSnapshot("info output lists no repositories".to_string()),
            n => Error::MalformedSnapshot(format!(
                "none of the {} repositories in info output is at {}",
                n, location
            )),
        })?;

    let entry: InfoEntry = serde_json::from_value(entry.clone())
        .map_err(|e| Error::MalformedSnapshot(format!("unexpected repository entry: {}", e)))?;

    let cache = entry.cache.map(|c| c.stats).unwrap_or_default();

    let archives = entry
        .archives
        .into_iter()
        .map(|value| match serde_json::from_value::<RawArchive>(value.clone()) {
            Ok(archive) => archive,
            Err(e) => {
                let name = value.get("name").and_then(Value::as_str).map(str::to_string);
                debug!(error = %e, "Archive entry could not be decoded");
                RawArchive::undecodable(name, e.to_string())
            }
        })
        .collect();

    Ok(SourceSnapshot {
        repository: RawRepository {
            id: entry.repository.id,
            location: entry.repository.location,
            encryption_mode: entry.encryption.and_then(|e| e.mode),
            size_on_disk_bytes: cache.unique_csize,
            last_modified: entry.repository.last_modified,
        },
        archives,
        stats: CacheCounters {
            total_chunks: cache.total_chunks,
            unique_chunks: cache.total_unique_chunks,
            total_csize: cache.total_csize,
            unique_csize: cache.unique_csize,
        },
        configuration: None,
        database_dumps: Vec::new(),
    })
}

/// Parse `borg list` lines for dump files under `borgmatic/<type>_databases/`
///
/// Directory entries and unrecognized lines are ignored.
pub fn parse_database_listing(output: &str) -> Vec<DatabaseDump> {
    output.lines().filter_map(parse_listing_line).collect()
}

fn parse_listing_line(line: &str) -> Option<DatabaseDump> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    // mode, user, group, size, weekday, date, time, path
    if fields.len() < 5 || !fields[0].starts_with('-') {
        return None;
    }

    let path = *fields.last()?;
    let start = path.find("borgmatic/")?;
    let segments: Vec<&str> = path[start..].split('/').collect();
    // borgmatic / <type>_databases / [hostname /] name
    if segments.len() < 3 {
        return None;
    }
    let database_type = segments[1].strip_suffix("_databases")?;
    let database_name = segments.last()?;
    if database_type.is_empty() || database_name.is_empty() {
        return None;
    }
    let hostname = (segments.len() > 3).then(|| segments[segments.len() - 2].to_string());

    Some(DatabaseDump {
        database_type: database_type.to_string(),
        database_name: database_name.to_string(),
        hostname,
        size_bytes: fields[3].parse().unwrap_or(0),
        path: path.to_string(),
    })
}

/// Extract source directories and retention values from a borgmatic YAML file
///
/// Understands both the flat layout and the older sectioned one
/// (`location:` / `retention:`).
pub fn parse_configuration(yaml: &str) -> Result<SourceConfiguration> {
    let document: YamlValue = serde_yaml::from_str(yaml)
        .map_err(|e| Error::MalformedSnapshot(format!("borgmatic configuration: {}", e)))?;
    let root = document.as_mapping().ok_or_else(|| {
        Error::MalformedSnapshot("borgmatic configuration is not a mapping".to_string())
    })?;

    let location = section(root, "location");
    let retention = section(root, "retention");

    let source_directories = lookup(root, location, "source_directories").and_then(|value| {
        let list = value.as_sequence()?;
        Some(
            list.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect::<Vec<_>>(),
        )
    });

    let keep = |key: &str| lookup(root, retention, key).and_then(YamlValue::as_i64);
    let keep_within = lookup(root, retention, "keep_within").and_then(|value| match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        _ => {
            warn!("Ignoring non-scalar keep_within");
            None
        }
    });

    Ok(SourceConfiguration {
        source_directories,
        retention: RetentionSettings {
            keep_daily: keep("keep_daily"),
            keep_weekly: keep("keep_weekly"),
            keep_monthly: keep("keep_monthly"),
            keep_yearly: keep("keep_yearly"),
            keep_within,
        },
    })
}

fn section<'a>(root: &'a Mapping, name: &str) -> Option<&'a Mapping> {
    root.get(name).and_then(YamlValue::as_mapping)
}

/// Top-level key first, then the legacy section
fn lookup<'a>(root: &'a Mapping, legacy: Option<&'a Mapping>, key: &str) -> Option<&'a YamlValue> {
    root.get(key).or_else(|| legacy.and_then(|s| s.get(key)))
}
