//! ABOUTME: Shared testing utilities and borgmatic output fixtures
//! ABOUTME: Canned JSON, listing, and YAML samples used across crates

use serde_json::{json, Value};

/// Local repository path used by the fixtures
pub fn sample_repository_path() -> &'static str {
    "/mnt/borg-repository"
}

/// Remote repository path used by the fixtures
pub fn sample_remote_path() -> &'static str {
    "ssh://backup@offsite.example.com:22/./borg"
}

/// One archive entry in the shape `borgmatic info --json` reports it
pub fn archive_json(name: &str, hash: &str, start: &str, end: &str, original_size: u64) -> Value {
    json!({
        "name": name,
        "id": hash,
        "hostname": "nas",
        "username": "root",
        "comment": "",
        "start": start,
        "end": end,
        "duration": 754.25,
        "stats": {
            "original_size": original_size,
            "compressed_size": original_size / 2,
            "deduplicated_size": original_size / 10,
            "nfiles": 1200
        }
    })
}

/// Full `borgmatic info --json` output for one repository
pub fn info_json(repository_id: &str, location: &str, archives: Vec<Value>) -> String {
    json!([{
        "repository": {
            "id": repository_id,
            "label": "main",
            "location": location,
            "last_modified": "2024-01-15T11:00:00.000000"
        },
        "encryption": { "mode": "repokey-blake2" },
        "cache": {
            "stats": {
                "total_chunks": 4200,
                "total_csize": 9_000_000u64,
                "total_size": 20_000_000u64,
                "total_unique_chunks": 1300,
                "unique_csize": 3_000_000u64,
                "unique_size": 6_000_000u64
            }
        },
        "archives": archives
    }])
    .to_string()
}

/// Two-archive sample matching the default fixture repository
pub fn sample_info_json() -> String {
    info_json(
        "a1b2c3d4e5f6",
        sample_repository_path(),
        vec![
            archive_json(
                "nas-2024-01-14T02:00:00",
                "h1",
                "2024-01-14T02:00:00.000000",
                "2024-01-14T02:12:34.000000",
                10_000_000,
            ),
            archive_json(
                "nas-2024-01-15T02:00:00",
                "h2",
                "2024-01-15T02:00:00.000000",
                "2024-01-15T02:12:34.000000",
                10_000_000,
            ),
        ],
    )
}

/// `borgmatic list --find *borgmatic/*_databases` output for the latest archive
pub fn sample_database_listing() -> &'static str {
    "drwxr-xr-x root   root          0 Mon, 2024-01-15 02:00:01 borgmatic/postgresql_databases\n\
     -rw-r--r-- root   root    1048576 Mon, 2024-01-15 02:00:02 borgmatic/postgresql_databases/db.internal/nextcloud\n\
     -rw-r--r-- root   root      20480 Mon, 2024-01-15 02:00:03 borgmatic/mariadb_databases/localhost/wordpress\n\
     garbage line that should be ignored\n"
}

/// Minimal borgmatic YAML configuration
pub fn sample_borgmatic_config() -> &'static str {
    r#"
source_directories:
    - /home
    - /etc
repositories:
    - path: /mnt/borg-repository
      label: main
keep_daily: 7
keep_weekly: 4
keep_monthly: 6
keep_within: 48H
"#
}
