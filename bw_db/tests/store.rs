//! ABOUTME: Store-level tests for stats snapshots, source sync, retention, and dumps
//! ABOUTME: Runs against a real migrated SQLite file in a temp directory

use bw_db::{
    ArchiveRepository, BackupRepositoryStore, BackupSourceRepository, DatabaseBackupRepository,
    Db, LocationType, NewArchive, NewDatabaseBackup, NewRepositoryStats, PruningConfigRepository,
    RepositoryStatsRepository, RetentionValues, UpsertRepositoryRequest,
};
use tempfile::TempDir;

async fn open() -> (Db, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let db = Db::new(path.to_str().unwrap()).await.unwrap();
    (db, dir)
}

async fn seed_repository(db: &Db, name: &str, path: &str) -> i64 {
    let mut conn = db.pool().acquire().await.unwrap();
    let (row, created) = BackupRepositoryStore::upsert(
        &mut conn,
        &UpsertRepositoryRequest {
            name: name.to_string(),
            path: path.to_string(),
            location_type: LocationType::from_path(path),
            repository_identifier: Some(format!("id-{}", name)),
            encryption_mode: Some("repokey-blake2".into()),
            size_on_disk_bytes: Some(3_000_000),
            last_modified: None,
        },
    )
    .await
    .unwrap();
    assert!(created);
    row.id
}

fn stats(repository_id: i64, archives: i64, collected_at: &str) -> NewRepositoryStats {
    NewRepositoryStats {
        repository_id,
        collected_at: collected_at.to_string(),
        total_archives: archives,
        total_size_bytes: archives * 1000,
        total_compressed_size_bytes: archives * 500,
        total_deduplicated_size_bytes: archives * 100,
        total_chunks: Some(4200),
        unique_chunks: Some(1300),
        total_csize: None,
        unique_csize: None,
        compression_ratio: 0.5,
        deduplication_ratio: 0.1,
    }
}

#[tokio::test]
async fn stats_history_is_append_only_and_ordered() {
    let (db, _dir) = open().await;
    let repo_id = seed_repository(&db, "main", "/mnt/borg-repository").await;

    let mut conn = db.pool().acquire().await.unwrap();
    let collected = [
        (1, "2024-01-13T00:00:00Z"),
        (2, "2024-01-14T00:00:00Z"),
        (3, "2024-01-15T00:00:00Z"),
    ];
    for (n, at) in collected {
        RepositoryStatsRepository::append(&mut conn, &stats(repo_id, n, at))
            .await
            .unwrap();
    }

    let repo = RepositoryStatsRepository::new(db.pool());
    let latest = repo.latest_for_repository(repo_id).await.unwrap().unwrap();
    assert_eq!(latest.total_archives, 3);

    let history = repo.history(repo_id, 2).await.unwrap();
    let counts: Vec<i64> = history.iter().map(|s| s.total_archives).collect();
    assert_eq!(counts, vec![2, 3]);

    let all = RepositoryStatsRepository::latest_per_repository(&mut conn)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, latest.id);
}

#[tokio::test]
async fn source_sync_deactivates_removed_paths() {
    let (db, _dir) = open().await;
    let repo_id = seed_repository(&db, "main", "/mnt/borg-repository").await;
    let mut conn = db.pool().acquire().await.unwrap();

    let first = BackupSourceRepository::sync(
        &mut conn,
        repo_id,
        &["/home".to_string(), "/etc".to_string()],
        "2024-01-14T00:00:00Z",
    )
    .await
    .unwrap();
    assert_eq!(first.active, 2);
    assert_eq!(first.deactivated, 0);

    let second = BackupSourceRepository::sync(
        &mut conn,
        repo_id,
        &["/home".to_string(), "/srv".to_string()],
        "2024-01-15T00:00:00Z",
    )
    .await
    .unwrap();
    assert_eq!(second.deactivated, 1);
    drop(conn);

    let sources = BackupSourceRepository::new(db.pool())
        .list_for_repository(repo_id)
        .await
        .unwrap();
    assert_eq!(sources.len(), 3);

    let etc = sources.iter().find(|s| s.source_path == "/etc").unwrap();
    assert!(!etc.is_active);
    let home = sources.iter().find(|s| s.source_path == "/home").unwrap();
    assert!(home.is_active);
    assert_eq!(home.first_seen_at, "2024-01-14T00:00:00Z");
    assert_eq!(home.last_seen_at, "2024-01-15T00:00:00Z");
}

#[tokio::test]
async fn retention_upsert_replaces_values() {
    let (db, _dir) = open().await;
    let repo_id = seed_repository(&db, "main", "/mnt/borg-repository").await;
    let mut conn = db.pool().acquire().await.unwrap();

    let initial = RetentionValues {
        keep_daily: Some(7),
        keep_weekly: Some(4),
        keep_monthly: Some(6),
        keep_yearly: None,
        keep_within: Some("48H".into()),
    };
    PruningConfigRepository::upsert(&mut conn, repo_id, &initial, "2024-01-14T00:00:00Z")
        .await
        .unwrap();

    let changed = RetentionValues {
        keep_daily: Some(14),
        ..RetentionValues::default()
    };
    PruningConfigRepository::upsert(&mut conn, repo_id, &changed, "2024-01-15T00:00:00Z")
        .await
        .unwrap();
    drop(conn);

    let stored = PruningConfigRepository::new(db.pool())
        .find_for_repository(repo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.keep_daily, Some(14));
    assert_eq!(stored.keep_weekly, None);
    assert_eq!(stored.keep_within, None);
    assert_eq!(stored.updated_at, "2024-01-15T00:00:00Z");
}

#[tokio::test]
async fn dumps_are_removed_with_their_repository() {
    let (db, _dir) = open().await;
    let repo_id =
        seed_repository(&db, "offsite", "ssh://backup@offsite.example.com:22/./borg").await;
    let mut conn = db.pool().acquire().await.unwrap();

    let archive_id = ArchiveRepository::insert_if_absent(
        &mut conn,
        repo_id,
        &NewArchive {
            archive_name: "nas-2024-01-15".into(),
            archive_hash: "h1".into(),
            hostname: Some("nas".into()),
            username: Some("root".into()),
            comment: None,
            start_time: "2024-01-15T02:00:00Z".into(),
            end_time: Some("2024-01-15T02:12:34Z".into()),
            duration_seconds: Some(754.0),
            original_size_bytes: 1000,
            compressed_size_bytes: 500,
            deduplicated_size_bytes: 100,
            file_count: 12,
        },
    )
    .await
    .unwrap()
    .unwrap();

    let written = DatabaseBackupRepository::insert_for_archive(
        &mut conn,
        archive_id,
        &[
            NewDatabaseBackup {
                database_type: "postgresql".into(),
                database_name: "nextcloud".into(),
                hostname: Some("db.internal".into()),
                size_bytes: 1_048_576,
                backup_path: Some("borgmatic/postgresql_databases/db.internal/nextcloud".into()),
            },
            NewDatabaseBackup {
                database_type: "mariadb".into(),
                database_name: "wordpress".into(),
                hostname: Some("localhost".into()),
                size_bytes: 20_480,
                backup_path: None,
            },
        ],
    )
    .await
    .unwrap();
    assert_eq!(written, 2);
    drop(conn);

    let dumps = DatabaseBackupRepository::new(db.pool());
    let listed = dumps.list_for_archive(archive_id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].database_type, "mariadb");

    assert!(BackupRepositoryStore::new(db.pool())
        .delete(repo_id)
        .await
        .unwrap());
    assert!(dumps.list_for_archive(archive_id).await.unwrap().is_empty());

    let counts = db.stats().await.unwrap().table_counts;
    assert_eq!(counts["backup_archives"], 0);
    assert_eq!(counts["database_backups"], 0);
}
