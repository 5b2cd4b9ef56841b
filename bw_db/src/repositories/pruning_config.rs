//! ABOUTME: Retention policy per repository, upserted on each observation

use bw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Retention row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PruningConfig {
    pub id: i64,
    pub repository_id: i64,
    pub keep_daily: Option<i64>,
    pub keep_weekly: Option<i64>,
    pub keep_monthly: Option<i64>,
    pub keep_yearly: Option<i64>,
    pub keep_within: Option<String>,
    pub updated_at: String,
}

/// `keep_*` values as configured in borgmatic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionValues {
    pub keep_daily: Option<i64>,
    pub keep_weekly: Option<i64>,
    pub keep_monthly: Option<i64>,
    pub keep_yearly: Option<i64>,
    pub keep_within: Option<String>,
}

pub struct PruningConfigRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PruningConfigRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the repository's retention values
    pub async fn upsert(
        conn: &mut SqliteConnection,
        repository_id: i64,
        values: &RetentionValues,
        updated_at: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pruning_config (
                repository_id, keep_daily, keep_weekly, keep_monthly, keep_yearly, keep_within, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (repository_id) DO UPDATE SET
                keep_daily = excluded.keep_daily,
                keep_weekly = excluded.keep_weekly,
                keep_monthly = excluded.keep_monthly,
                keep_yearly = excluded.keep_yearly,
                keep_within = excluded.keep_within,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(repository_id)
        .bind(values.keep_daily)
        .bind(values.keep_weekly)
        .bind(values.keep_monthly)
        .bind(values.keep_yearly)
        .bind(&values.keep_within)
        .bind(updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert pruning config: {}", e)))?;

        Ok(())
    }

    pub async fn find_for_repository(&self, repository_id: i64) -> Result<Option<PruningConfig>> {
        sqlx::query_as::<_, PruningConfig>("SELECT * FROM pruning_config WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to find pruning config: {}", e)))
    }
}
