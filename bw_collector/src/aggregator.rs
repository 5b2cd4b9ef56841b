//! ABOUTME: Derived statistics: storage ratios, per-repository snapshots, daily trend
//! ABOUTME: Snapshots are appended inside the reconcile transaction; trends fold lazily

use bw_core::{to_rfc3339, Result};
use bw_db::{
    ArchiveRepository, DailyBucket, LocationType, NewRepositoryStats, RepositoryStats,
    RepositoryStatsRepository,
};
use bw_source::CacheCounters;
use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::{iter::Peekable, slice};
use tracing::{debug, instrument};

/// `part / original`, or 0 when nothing was backed up
///
/// ```
/// use bw_collector::aggregator::ratio;
/// assert_eq!(ratio(25, 100), 0.25);
/// assert_eq!(ratio(10, 0), 0.0);
/// ```
pub fn ratio(part: i64, original: i64) -> f64 {
    if original <= 0 {
        0.0
    } else {
        part as f64 / original as f64
    }
}

/// One day of the backup trend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// `YYYY-MM-DD`, UTC
    pub day: String,
    pub mean_local_original_size: Option<f64>,
    pub mean_remote_original_size: Option<f64>,
    /// Mean over archives that reported or implied a duration
    pub mean_duration_seconds: Option<f64>,
    pub archive_count: i64,
}

/// Daily buckets for a window, folded into [`TrendPoint`]s on iteration
///
/// Iterating twice yields the same points; nothing is computed until asked.
#[derive(Debug, Clone, Default)]
pub struct Trend {
    buckets: Vec<DailyBucket>,
}

impl Trend {
    pub fn from_buckets(buckets: Vec<DailyBucket>) -> Self {
        Self { buckets }
    }

    pub fn iter(&self) -> TrendIter<'_> {
        TrendIter {
            buckets: self.buckets.iter().peekable(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl<'a> IntoIterator for &'a Trend {
    type Item = TrendPoint;
    type IntoIter = TrendIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Chronological fold over adjacent same-day buckets
pub struct TrendIter<'a> {
    buckets: Peekable<slice::Iter<'a, DailyBucket>>,
}

#[derive(Default)]
struct ClassSum {
    count: i64,
    size: f64,
}

impl ClassSum {
    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.size / self.count as f64)
    }
}

impl Iterator for TrendIter<'_> {
    type Item = TrendPoint;

    fn next(&mut self) -> Option<TrendPoint> {
        let first = self.buckets.next()?;
        let day = first.day.clone();

        let mut local = ClassSum::default();
        let mut remote = ClassSum::default();
        let mut duration_total = 0.0;
        let mut timed = 0;
        let mut archive_count = 0;

        let mut current = Some(first);
        while let Some(bucket) = current {
            let class = match LocationType::parse(&bucket.location_type) {
                Some(LocationType::Remote) => &mut remote,
                _ => &mut local,
            };
            class.count += bucket.archive_count;
            class.size += bucket.total_original_size;
            duration_total += bucket.total_duration_seconds;
            timed += bucket.timed_archive_count;
            archive_count += bucket.archive_count;

            current = self.buckets.next_if(|next| next.day == day);
        }

        Some(TrendPoint {
            day,
            mean_local_original_size: local.mean(),
            mean_remote_original_size: remote.mean(),
            mean_duration_seconds: (timed > 0).then(|| duration_total / timed as f64),
            archive_count,
        })
    }
}

/// Aggregation over the persisted archive history
pub struct Aggregator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Aggregator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a stats snapshot computed from the repository's persisted archives
    ///
    /// Runs on the caller's connection so it sees (and commits with) archives
    /// inserted earlier in the same transaction.
    pub async fn compute_repository_stats(
        conn: &mut SqliteConnection,
        repository_id: i64,
        counters: &CacheCounters,
        collected_at: DateTime<Utc>,
    ) -> Result<RepositoryStats> {
        let totals = ArchiveRepository::totals_for_repository(&mut *conn, repository_id).await?;

        let stats = NewRepositoryStats {
            repository_id,
            collected_at: to_rfc3339(collected_at),
            total_archives: totals.archive_count,
            total_size_bytes: totals.original_size_bytes,
            total_compressed_size_bytes: totals.compressed_size_bytes,
            total_deduplicated_size_bytes: totals.deduplicated_size_bytes,
            total_chunks: counters.total_chunks,
            unique_chunks: counters.unique_chunks,
            total_csize: counters.total_csize,
            unique_csize: counters.unique_csize,
            compression_ratio: ratio(totals.compressed_size_bytes, totals.original_size_bytes),
            deduplication_ratio: ratio(totals.deduplicated_size_bytes, totals.original_size_bytes),
        };

        debug!(
            repository_id,
            archives = stats.total_archives,
            compression_ratio = stats.compression_ratio,
            "Appending repository stats"
        );
        RepositoryStatsRepository::append(conn, &stats).await
    }

    /// Trend over the last `window_days` calendar days, today included
    #[instrument(skip(self))]
    pub async fn compute_trend(&self, window_days: u32, now: DateTime<Utc>) -> Result<Trend> {
        let since = window_start(window_days, now);
        let buckets = ArchiveRepository::new(self.pool)
            .daily_buckets(&to_rfc3339(since))
            .await?;
        Ok(Trend::from_buckets(buckets))
    }

    /// Up to `limit` most recent snapshots of a repository, oldest first
    pub async fn stats_history(
        &self,
        repository_id: i64,
        limit: i64,
    ) -> Result<Vec<RepositoryStats>> {
        RepositoryStatsRepository::new(self.pool)
            .history(repository_id, limit)
            .await
    }
}

/// Midnight UTC at the start of the window
fn window_start(window_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let back = u64::from(window_days.max(1) - 1);
    now.date_naive()
        .checked_sub_days(Days::new(back))
        .unwrap_or(chrono::NaiveDate::MIN)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(
        day: &str,
        class: &str,
        count: i64,
        size: f64,
        duration: f64,
        timed: i64,
    ) -> DailyBucket {
        DailyBucket {
            day: day.to_string(),
            location_type: class.to_string(),
            archive_count: count,
            total_original_size: size,
            total_duration_seconds: duration,
            timed_archive_count: timed,
        }
    }

    #[test]
    fn test_ratio_edges() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(5, -3), 0.0);
        assert_eq!(ratio(50, 100), 0.5);
        assert_eq!(ratio(100, 100), 1.0);
    }

    #[test]
    fn test_trend_folds_classes_per_day() {
        let trend = Trend::from_buckets(vec![
            bucket("2024-01-14", "local", 2, 300.0, 100.0, 2),
            bucket("2024-01-14", "remote", 1, 1000.0, 0.0, 0),
            bucket("2024-01-15", "remote", 2, 50.0, 30.0, 1),
        ]);

        let points: Vec<TrendPoint> = trend.iter().collect();
        assert_eq!(points.len(), 2);

        assert_eq!(points[0].day, "2024-01-14");
        assert_eq!(points[0].archive_count, 3);
        assert_eq!(points[0].mean_local_original_size, Some(150.0));
        assert_eq!(points[0].mean_remote_original_size, Some(1000.0));
        assert_eq!(points[0].mean_duration_seconds, Some(50.0));

        assert_eq!(points[1].mean_local_original_size, None);
        assert_eq!(points[1].mean_remote_original_size, Some(25.0));
        assert_eq!(points[1].mean_duration_seconds, Some(30.0));
    }

    #[test]
    fn test_trend_is_restartable() {
        let trend = Trend::from_buckets(vec![bucket("2024-01-14", "local", 1, 1.0, 0.0, 0)]);
        assert_eq!(trend.iter().count(), 1);
        assert_eq!(trend.iter().count(), 1);
        assert_eq!(trend.iter().next().unwrap().mean_duration_seconds, None);
        assert!(Trend::default().iter().next().is_none());
    }

    #[test]
    fn test_window_start() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 13, 45, 0).unwrap();
        assert_eq!(to_rfc3339(window_start(1, now)), "2024-01-15T00:00:00Z");
        assert_eq!(to_rfc3339(window_start(7, now)), "2024-01-09T00:00:00Z");
        assert_eq!(window_start(0, now), window_start(1, now));
    }
}
