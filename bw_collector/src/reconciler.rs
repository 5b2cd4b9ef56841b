//! ABOUTME: Merges one repository snapshot into the store in a single transaction
//! ABOUTME: Idempotent by archive hash; bad archives are reported, not fatal

use crate::{aggregator::Aggregator, schema::validate_archive};
use bw_core::{parse_timestamp, to_rfc3339, utc_now, Error, Result};
use bw_db::{
    ArchiveRepository, BackupRepositoryStore, BackupSourceRepository, DatabaseBackupRepository,
    Db, LocationType, NewArchive, NewDatabaseBackup, PruningConfigRepository, RepositoryStats,
    RetentionValues, SourceSyncSummary, UpsertRepositoryRequest,
};
use bw_source::{RepositoryTarget, SourceSnapshot};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Whether the repository row existed before this reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryChange {
    Created,
    Updated,
}

/// An archive entry that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFailure {
    /// Position in the snapshot's archive list
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

/// Outcome of reconciling one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub repository_id: i64,
    pub change: RepositoryChange,
    pub inserted: usize,
    pub skipped: usize,
    pub failures: Vec<ArchiveFailure>,
    pub database_dumps_recorded: usize,
    pub sources: Option<SourceSyncSummary>,
    pub stats: RepositoryStats,
}

/// Snapshot-to-store merger
///
/// Reconciliations of the same repository are serialized; different
/// repositories proceed in parallel up to SQLite's single writer.
pub struct Reconciler {
    db: Db,
    store_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(db: Db, store_timeout: Duration) -> Self {
        Self {
            db,
            store_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge `snapshot` into the store under `target.name`
    ///
    /// Either everything for the repository commits or nothing does. Store
    /// failures and an elapsed store timeout surface as `StoreTransaction`.
    #[instrument(skip(self, target, snapshot), fields(repository = %target.name))]
    pub async fn reconcile(
        &self,
        target: &RepositoryTarget,
        snapshot: &SourceSnapshot,
    ) -> Result<ReconcileResult> {
        let lock = self.lock_for(&target.name).await;
        let _guard = lock.lock().await;

        let mut valid = Vec::with_capacity(snapshot.archives.len());
        let mut failures = Vec::new();
        for (index, raw) in snapshot.archives.iter().enumerate() {
            match validate_archive(raw) {
                Ok(archive) => valid.push((index, archive)),
                Err(e) => {
                    warn!(index, name = ?raw.name, error = %e, "Skipping malformed archive");
                    failures.push(ArchiveFailure {
                        index,
                        name: raw.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let write = self.write(target, snapshot, &valid);
        let mut result = match tokio::time::timeout(self.store_timeout, write).await {
            Ok(Ok(result)) => result,
            Ok(Err(Error::StoreTransaction(message))) => {
                return Err(Error::StoreTransaction(message))
            }
            Ok(Err(e)) => return Err(Error::StoreTransaction(e.to_string())),
            Err(_) => {
                return Err(Error::StoreTransaction(format!(
                    "transaction exceeded {:?} and was rolled back",
                    self.store_timeout
                )))
            }
        };
        result.failures = failures;

        counter!("archives_inserted_total").increment(result.inserted as u64);
        counter!("archives_skipped_total").increment(result.skipped as u64);
        counter!("archive_parse_failures_total").increment(result.failures.len() as u64);

        info!(
            repository_id = result.repository_id,
            change = ?result.change,
            inserted = result.inserted,
            skipped = result.skipped,
            failed = result.failures.len(),
            "Repository reconciled"
        );
        Ok(result)
    }

    async fn write(
        &self,
        target: &RepositoryTarget,
        snapshot: &SourceSnapshot,
        archives: &[(usize, NewArchive)],
    ) -> Result<ReconcileResult> {
        let now = utc_now();
        let mut tx = self.db.begin().await?;

        let request = UpsertRepositoryRequest {
            name: target.name.clone(),
            path: target.path.clone(),
            location_type: LocationType::from_path(&target.path),
            repository_identifier: snapshot
                .repository
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            encryption_mode: snapshot.repository.encryption_mode.clone(),
            size_on_disk_bytes: snapshot.repository.size_on_disk_bytes,
            last_modified: snapshot
                .repository
                .last_modified
                .as_deref()
                .and_then(parse_timestamp)
                .map(to_rfc3339),
        };
        let (repository, created) = BackupRepositoryStore::upsert(&mut tx, &request).await?;

        let newest_index = snapshot.archives.len().checked_sub(1);
        let mut newest_inserted = None;
        let mut inserted = 0;
        let mut skipped = 0;
        for (index, archive) in archives {
            match ArchiveRepository::insert_if_absent(&mut tx, repository.id, archive).await? {
                Some(id) => {
                    inserted += 1;
                    if Some(*index) == newest_index {
                        newest_inserted = Some(id);
                    }
                }
                None => skipped += 1,
            }
        }

        // Dumps describe the latest archive only; attach them the one time it is new.
        let mut database_dumps_recorded = 0;
        if let Some(archive_id) = newest_inserted {
            if !snapshot.database_dumps.is_empty() {
                let dumps: Vec<NewDatabaseBackup> = snapshot
                    .database_dumps
                    .iter()
                    .map(|dump| NewDatabaseBackup {
                        database_type: dump.database_type.clone(),
                        database_name: dump.database_name.clone(),
                        hostname: dump.hostname.clone(),
                        size_bytes: dump.size_bytes,
                        backup_path: Some(dump.path.clone()),
                    })
                    .collect();
                database_dumps_recorded =
                    DatabaseBackupRepository::insert_for_archive(&mut tx, archive_id, &dumps)
                        .await?;
            }
        }

        let mut sources = None;
        if let Some(configuration) = &snapshot.configuration {
            let seen_at = to_rfc3339(now);
            if let Some(directories) = &configuration.source_directories {
                sources = Some(
                    BackupSourceRepository::sync(&mut tx, repository.id, directories, &seen_at)
                        .await?,
                );
            }
            let retention = &configuration.retention;
            let values = RetentionValues {
                keep_daily: retention.keep_daily,
                keep_weekly: retention.keep_weekly,
                keep_monthly: retention.keep_monthly,
                keep_yearly: retention.keep_yearly,
                keep_within: retention.keep_within.clone(),
            };
            PruningConfigRepository::upsert(&mut tx, repository.id, &values, &seen_at).await?;
        }

        let stats =
            Aggregator::compute_repository_stats(&mut tx, repository.id, &snapshot.stats, now)
                .await?;

        tx.commit()
            .await
            .map_err(|e| Error::StoreTransaction(format!("commit failed: {}", e)))?;

        debug!(repository_id = repository.id, "Reconcile transaction committed");

        Ok(ReconcileResult {
            repository_id: repository.id,
            change: if created {
                RepositoryChange::Created
            } else {
                RepositoryChange::Updated
            },
            inserted,
            skipped,
            failures: Vec::new(),
            database_dumps_recorded,
            sources,
            stats,
        })
    }
}
