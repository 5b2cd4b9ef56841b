//! ABOUTME: Source directories configured for a repository
//! ABOUTME: Set-like membership; paths dropped from configuration go inactive, never away

use bw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

/// Source directory entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct BackupSource {
    pub id: i64,
    pub repository_id: i64,
    pub source_path: String,
    pub is_active: bool,
    pub first_seen_at: String,
    pub last_seen_at: String,
}

/// Outcome of reconciling the configured directory set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSyncSummary {
    pub active: usize,
    pub deactivated: usize,
}

/// Source directory table access
pub struct BackupSourceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BackupSourceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Make `paths` the active set for a repository
    pub async fn sync(
        conn: &mut SqliteConnection,
        repository_id: i64,
        paths: &[String],
        seen_at: &str,
    ) -> Result<SourceSyncSummary> {
        let wanted: HashSet<&str> = paths.iter().map(String::as_str).collect();

        for path in &wanted {
            sqlx::query(
                r#"
                INSERT INTO backup_sources (repository_id, source_path, is_active, first_seen_at, last_seen_at)
                VALUES (?, ?, 1, ?, ?)
                ON CONFLICT (repository_id, source_path)
                DO UPDATE SET is_active = 1, last_seen_at = excluded.last_seen_at
                "#,
            )
            .bind(repository_id)
            .bind(*path)
            .bind(seen_at)
            .bind(seen_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to record source {}: {}", path, e)))?;
        }

        let active: Vec<String> = sqlx::query_scalar(
            "SELECT source_path FROM backup_sources WHERE repository_id = ? AND is_active = 1",
        )
        .bind(repository_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to list active sources: {}", e)))?;

        let mut deactivated = 0;
        for stale in active.iter().filter(|p| !wanted.contains(p.as_str())) {
            debug!(repository_id, path = %stale, "Source directory left configuration");
            sqlx::query(
                "UPDATE backup_sources SET is_active = 0 WHERE repository_id = ? AND source_path = ?",
            )
            .bind(repository_id)
            .bind(stale)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to deactivate source: {}", e)))?;
            deactivated += 1;
        }

        Ok(SourceSyncSummary {
            active: wanted.len(),
            deactivated,
        })
    }

    /// All directories ever seen for a repository, active first
    pub async fn list_for_repository(&self, repository_id: i64) -> Result<Vec<BackupSource>> {
        sqlx::query_as::<_, BackupSource>(
            "SELECT * FROM backup_sources WHERE repository_id = ? ORDER BY is_active DESC, source_path",
        )
        .bind(repository_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list sources: {}", e)))
    }
}
