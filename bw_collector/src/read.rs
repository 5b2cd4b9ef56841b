//! ABOUTME: Read model served to the API: stats, repositories with health, archives, trend
//! ABOUTME: Only ever reads committed rows; limits are clamped here

use crate::{
    aggregator::{ratio, Aggregator, TrendPoint},
    health::{evaluate, hours_since, HealthStatus},
};
use bw_core::{parse_timestamp, Error, Result};
use bw_db::{
    ArchiveListing, ArchiveRepository, ArchiveTotals, BackupRepositoryStore, Db,
    RepositoryOverview, RepositoryStats, RepositoryStatsRepository,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::instrument;

pub const DEFAULT_ARCHIVE_LIMIT: i64 = 50;
pub const MAX_ARCHIVE_LIMIT: i64 = 1000;
pub const DEFAULT_TREND_DAYS: u32 = 30;
pub const MAX_TREND_DAYS: u32 = 365;

/// Totals across every repository plus each one's latest snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsOverview {
    pub repository_count: usize,
    #[serde(flatten)]
    pub totals: ArchiveTotals,
    pub compression_ratio: f64,
    pub deduplication_ratio: f64,
    pub health: HealthCounts,
    pub latest: Vec<RepositoryStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
}

impl HealthCounts {
    fn record(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Warning => self.warning += 1,
            HealthStatus::Critical => self.critical += 1,
        }
    }
}

/// Repository listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub overview: RepositoryOverview,
    pub health: HealthStatus,
    pub hours_since_last_backup: Option<f64>,
}

/// Read-side queries over a [`Db`]
#[derive(Debug, Clone)]
pub struct ReadModel {
    db: Db,
}

impl ReadModel {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Totals, latest snapshots, and health counts from one read transaction
    #[instrument(skip(self))]
    pub async fn get_stats(&self, now: DateTime<Utc>) -> Result<StatsOverview> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin read: {}", e)))?;

        let totals = ArchiveRepository::totals(&mut tx).await?;
        let latest = RepositoryStatsRepository::latest_per_repository(&mut tx).await?;
        let repositories = summaries(&mut tx, now).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to finish read: {}", e)))?;

        let mut health = HealthCounts::default();
        for repository in &repositories {
            health.record(repository.health);
        }

        Ok(StatsOverview {
            repository_count: repositories.len(),
            compression_ratio: ratio(totals.compressed_size_bytes, totals.original_size_bytes),
            deduplication_ratio: ratio(totals.deduplicated_size_bytes, totals.original_size_bytes),
            totals,
            health,
            latest,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_repositories(&self, now: DateTime<Utc>) -> Result<Vec<RepositorySummary>> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))?;
        summaries(&mut conn, now).await
    }

    /// Newest archives first; `limit` is clamped to 1..=1000
    pub async fn get_archives(&self, limit: i64) -> Result<Vec<ArchiveListing>> {
        ArchiveRepository::new(self.db.pool())
            .list_recent(clamp_archive_limit(limit))
            .await
    }

    /// Daily trend; `days` is clamped to 1..=365
    pub async fn get_trend(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<TrendPoint>> {
        let trend = Aggregator::new(self.db.pool())
            .compute_trend(clamp_trend_days(days), now)
            .await?;
        Ok(trend.iter().collect())
    }
}

async fn summaries(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<RepositorySummary>> {
    let overviews = BackupRepositoryStore::list_overview(conn).await?;

    Ok(overviews
        .into_iter()
        .map(|overview| {
            let last = overview.last_backup_time.as_deref().and_then(parse_timestamp);
            RepositorySummary {
                health: evaluate(last, now),
                hours_since_last_backup: last.map(|last| hours_since(last, now)),
                overview,
            }
        })
        .collect())
}

pub fn clamp_archive_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_ARCHIVE_LIMIT)
}

pub fn clamp_trend_days(days: u32) -> u32 {
    days.clamp(1, MAX_TREND_DAYS)
}
