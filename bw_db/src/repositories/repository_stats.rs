//! ABOUTME: Append-only repository statistics snapshots
//! ABOUTME: One row per reconciliation, read back in collection order for trends

use bw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Stats snapshot entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RepositoryStats {
    pub id: i64,
    pub repository_id: i64,
    pub collected_at: String,
    pub total_archives: i64,
    pub total_size_bytes: i64,
    pub total_compressed_size_bytes: i64,
    pub total_deduplicated_size_bytes: i64,
    pub total_chunks: Option<i64>,
    pub unique_chunks: Option<i64>,
    pub total_csize: Option<i64>,
    pub unique_csize: Option<i64>,
    pub compression_ratio: f64,
    pub deduplication_ratio: f64,
}

/// Values for a new snapshot row
#[derive(Debug, Clone, PartialEq)]
pub struct NewRepositoryStats {
    pub repository_id: i64,
    pub collected_at: String,
    pub total_archives: i64,
    pub total_size_bytes: i64,
    pub total_compressed_size_bytes: i64,
    pub total_deduplicated_size_bytes: i64,
    pub total_chunks: Option<i64>,
    pub unique_chunks: Option<i64>,
    pub total_csize: Option<i64>,
    pub unique_csize: Option<i64>,
    pub compression_ratio: f64,
    pub deduplication_ratio: f64,
}

/// Stats snapshot table access
pub struct RepositoryStatsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RepositoryStatsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a snapshot; there is deliberately no update path
    pub async fn append(
        conn: &mut SqliteConnection,
        stats: &NewRepositoryStats,
    ) -> Result<RepositoryStats> {
        sqlx::query_as::<_, RepositoryStats>(
            r#"
            INSERT INTO repository_stats (
                repository_id, collected_at, total_archives, total_size_bytes,
                total_compressed_size_bytes, total_deduplicated_size_bytes,
                total_chunks, unique_chunks, total_csize, unique_csize,
                compression_ratio, deduplication_ratio
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(stats.repository_id)
        .bind(&stats.collected_at)
        .bind(stats.total_archives)
        .bind(stats.total_size_bytes)
        .bind(stats.total_compressed_size_bytes)
        .bind(stats.total_deduplicated_size_bytes)
        .bind(stats.total_chunks)
        .bind(stats.unique_chunks)
        .bind(stats.total_csize)
        .bind(stats.unique_csize)
        .bind(stats.compression_ratio)
        .bind(stats.deduplication_ratio)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to append repository stats: {}", e)))
    }

    /// Latest snapshot for one repository
    pub async fn latest_for_repository(
        &self,
        repository_id: i64,
    ) -> Result<Option<RepositoryStats>> {
        sqlx::query_as::<_, RepositoryStats>(
            "SELECT * FROM repository_stats WHERE repository_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get latest stats: {}", e)))
    }

    /// Latest snapshot of every repository that has one
    pub async fn latest_per_repository(
        conn: &mut SqliteConnection,
    ) -> Result<Vec<RepositoryStats>> {
        sqlx::query_as::<_, RepositoryStats>(
            r#"
            SELECT * FROM repository_stats
            WHERE id IN (SELECT MAX(id) FROM repository_stats GROUP BY repository_id)
            ORDER BY repository_id
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to get latest stats: {}", e)))
    }

    /// The most recent `limit` snapshots of a repository, in collection order
    pub async fn history(&self, repository_id: i64, limit: i64) -> Result<Vec<RepositoryStats>> {
        let mut rows = sqlx::query_as::<_, RepositoryStats>(
            "SELECT * FROM repository_stats WHERE repository_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(repository_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get stats history: {}", e)))?;
        rows.reverse();
        Ok(rows)
    }
}
