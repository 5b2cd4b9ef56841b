//! ABOUTME: Immutable backup archive rows, unique per (repository, archive hash)
//! ABOUTME: Insert-if-absent writes plus listing, totals, and daily trend buckets

use bw_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::instrument;

/// Archive entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Archive {
    pub id: i64,
    pub repository_id: i64,
    pub archive_name: String,
    pub archive_hash: String,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub original_size_bytes: i64,
    pub compressed_size_bytes: i64,
    pub deduplicated_size_bytes: i64,
    pub file_count: i64,
    pub recorded_at: String,
}

/// Archive with its repository's name and location, for cross-repository listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArchiveListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub archive: Archive,
    pub repository_name: String,
    pub location_type: String,
}

/// Validated archive ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewArchive {
    pub archive_name: String,
    pub archive_hash: String,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_seconds: Option<f64>,
    pub original_size_bytes: i64,
    pub compressed_size_bytes: i64,
    pub deduplicated_size_bytes: i64,
    pub file_count: i64,
}

/// Size sums over a repository's persisted archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ArchiveTotals {
    pub archive_count: i64,
    pub original_size_bytes: i64,
    pub compressed_size_bytes: i64,
    pub deduplicated_size_bytes: i64,
}

/// Archives of one location class on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DailyBucket {
    /// `YYYY-MM-DD` (UTC)
    pub day: String,
    pub location_type: String,
    pub archive_count: i64,
    pub total_original_size: f64,
    /// Sum over archives with a known duration
    pub total_duration_seconds: f64,
    pub timed_archive_count: i64,
}

/// Archive table access
pub struct ArchiveRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ArchiveRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an archive unless its hash is already recorded for the repository
    ///
    /// Returns the new row id, or `None` when the archive already existed.
    /// Existing rows are never touched.
    pub async fn insert_if_absent(
        conn: &mut SqliteConnection,
        repository_id: i64,
        archive: &NewArchive,
    ) -> Result<Option<i64>> {
        let recorded_at = now_iso8601();

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO backup_archives (
                repository_id, archive_name, archive_hash, hostname, username, comment,
                start_time, end_time, duration_seconds, original_size_bytes,
                compressed_size_bytes, deduplicated_size_bytes, file_count, recorded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (repository_id, archive_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(repository_id)
        .bind(&archive.archive_name)
        .bind(&archive.archive_hash)
        .bind(&archive.hostname)
        .bind(&archive.username)
        .bind(&archive.comment)
        .bind(&archive.start_time)
        .bind(&archive.end_time)
        .bind(archive.duration_seconds)
        .bind(archive.original_size_bytes)
        .bind(archive.compressed_size_bytes)
        .bind(archive.deduplicated_size_bytes)
        .bind(archive.file_count)
        .bind(&recorded_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(format!(
                "Failed to insert archive {}: {}",
                archive.archive_name, e
            ))
        })?;

        Ok(id)
    }

    /// Totals over every persisted archive of a repository
    pub async fn totals_for_repository(
        conn: &mut SqliteConnection,
        repository_id: i64,
    ) -> Result<ArchiveTotals> {
        sqlx::query_as::<_, ArchiveTotals>(
            r#"
            SELECT COUNT(*) AS archive_count,
                   COALESCE(SUM(original_size_bytes), 0) AS original_size_bytes,
                   COALESCE(SUM(compressed_size_bytes), 0) AS compressed_size_bytes,
                   COALESCE(SUM(deduplicated_size_bytes), 0) AS deduplicated_size_bytes
            FROM backup_archives
            WHERE repository_id = ?
            "#,
        )
        .bind(repository_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to total archives: {}", e)))
    }

    /// Most recent archives across all repositories, newest first
    #[instrument(skip(self))]
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ArchiveListing>> {
        sqlx::query_as::<_, ArchiveListing>(
            r#"
            SELECT a.*, r.name AS repository_name, r.location_type AS location_type
            FROM backup_archives a
            JOIN repositories r ON r.id = a.repository_id
            ORDER BY a.start_time DESC, a.id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list archives: {}", e)))
    }

    /// Archives of a single repository, oldest first
    pub async fn list_for_repository(&self, repository_id: i64) -> Result<Vec<Archive>> {
        sqlx::query_as::<_, Archive>(
            "SELECT * FROM backup_archives WHERE repository_id = ? ORDER BY start_time, id",
        )
        .bind(repository_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list repository archives: {}", e)))
    }

    /// Number of rows holding a given hash in a repository (0 or 1)
    pub async fn count_by_hash(&self, repository_id: i64, archive_hash: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM backup_archives WHERE repository_id = ? AND archive_hash = ?",
        )
        .bind(repository_id)
        .bind(archive_hash)
        .fetch_one(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count archives: {}", e)))
    }

    /// Totals across every repository
    pub async fn totals(conn: &mut SqliteConnection) -> Result<ArchiveTotals> {
        sqlx::query_as::<_, ArchiveTotals>(
            r#"
            SELECT COUNT(*) AS archive_count,
                   COALESCE(SUM(original_size_bytes), 0) AS original_size_bytes,
                   COALESCE(SUM(compressed_size_bytes), 0) AS compressed_size_bytes,
                   COALESCE(SUM(deduplicated_size_bytes), 0) AS deduplicated_size_bytes
            FROM backup_archives
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to total archives: {}", e)))
    }

    /// Archives started at or after `since`, grouped by UTC day and location class
    ///
    /// Ordered by day, so buckets of one day are adjacent.
    #[instrument(skip(self))]
    pub async fn daily_buckets(&self, since: &str) -> Result<Vec<DailyBucket>> {
        sqlx::query_as::<_, DailyBucket>(
            r#"
            SELECT date(a.start_time) AS day,
                   r.location_type AS location_type,
                   COUNT(*) AS archive_count,
                   CAST(COALESCE(SUM(a.original_size_bytes), 0) AS REAL) AS total_original_size,
                   CAST(COALESCE(SUM(a.duration_seconds), 0) AS REAL) AS total_duration_seconds,
                   COUNT(a.duration_seconds) AS timed_archive_count
            FROM backup_archives a
            JOIN repositories r ON r.id = a.repository_id
            WHERE a.start_time >= ?
            GROUP BY day, r.location_type
            ORDER BY day, r.location_type
            "#,
        )
        .bind(since)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to compute daily buckets: {}", e)))
    }
}
