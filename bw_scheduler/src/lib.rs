//! ABOUTME: Collection cycle scheduler with non-overlap and per-repository isolation
//! ABOUTME: Drives snapshot sources into the reconciler on a fixed interval

use bw_collector::Reconciler;
use bw_core::{utc_now, Error, Id, MonotonicTimer, Result};
use bw_obs::Metrics;
use bw_source::{RepositoryTarget, SnapshotSource};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, RwLock},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub mod state;

pub use state::{
    CycleOutcome, CycleReport, RepositoryOutcome, RepositoryReport, RepositoryState,
    SchedulerPhase,
};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between cycle starts
    pub interval: Duration,
    /// Repositories processed at once within a cycle
    pub max_concurrent_repositories: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            max_concurrent_repositories: 4,
        }
    }
}

/// A configured repository; `path` may be missing from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRepository {
    pub name: String,
    pub path: Option<String>,
}

impl ScheduledRepository {
    pub fn new(name: impl Into<String>, path: Option<String>) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    fn target(&self) -> Result<RepositoryTarget> {
        match self.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(RepositoryTarget::new(&self.name, path)),
            _ => Err(Error::ConfigurationMissing(format!(
                "{} has no repository path",
                self.name
            ))),
        }
    }
}

/// Runs collection cycles: fetch each repository's snapshot and reconcile it
pub struct CycleScheduler {
    config: SchedulerConfig,
    repositories: Vec<ScheduledRepository>,
    source: Arc<dyn SnapshotSource>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    cycle_guard: Mutex<()>,
    phase: RwLock<SchedulerPhase>,
    states: RwLock<HashMap<String, RepositoryState>>,
    reported_missing: Mutex<HashSet<String>>,
}

impl CycleScheduler {
    pub fn new(
        config: SchedulerConfig,
        repositories: Vec<ScheduledRepository>,
        source: Arc<dyn SnapshotSource>,
        reconciler: Arc<Reconciler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let states = repositories
            .iter()
            .map(|r| (r.name.clone(), RepositoryState::new(&r.name)))
            .collect();

        info!(
            repositories = repositories.len(),
            interval = %humantime::format_duration(config.interval),
            max_concurrent = config.max_concurrent_repositories,
            source = source.kind(),
            "Cycle scheduler initialized"
        );

        Self {
            config,
            repositories,
            source,
            reconciler,
            metrics,
            cycle_guard: Mutex::new(()),
            phase: RwLock::new(SchedulerPhase::Idle),
            states: RwLock::new(states),
            reported_missing: Mutex::new(HashSet::new()),
        }
    }

    pub async fn phase(&self) -> SchedulerPhase {
        self.phase.read().await.clone()
    }

    /// Per-repository records in configuration order
    pub async fn repository_states(&self) -> Vec<RepositoryState> {
        let states = self.states.read().await;
        self.repositories
            .iter()
            .filter_map(|r| states.get(&r.name).cloned())
            .collect()
    }

    /// Run one cycle unless one is already in progress
    ///
    /// Returns an error only when the store cannot be reached; repository
    /// failures are recorded in the report instead.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("Collection cycle requested while another is running; skipping");
            self.metrics.record_cycle("skipped", None);
            return Ok(CycleOutcome::Skipped);
        };

        let id = Id::new();
        let cycle_id = id.to_string();
        let started_at = id.created_at();
        *self.phase.write().await = SchedulerPhase::Running {
            cycle_id: cycle_id.clone(),
            started_at,
        };

        let span = info_span!("cycle", cycle_id = %cycle_id);
        let result = self
            .execute(cycle_id, started_at, cancel)
            .instrument(span)
            .await;

        *self.phase.write().await = SchedulerPhase::Idle;
        result.map(CycleOutcome::Completed)
    }

    async fn execute(
        &self,
        cycle_id: String,
        started_at: chrono::DateTime<chrono::Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let timer = MonotonicTimer::new();

        if let Err(e) = self.check_store().await {
            error!(error = %e, "Store unreachable; aborting cycle");
            self.metrics.record_cycle("aborted", None);
            return Err(e);
        }

        info!(repositories = self.repositories.len(), "Collection cycle started");

        let repositories: Vec<RepositoryReport> = stream::iter(self.repositories.iter())
            .map(|repository| self.run_unit(repository, cancel))
            .buffer_unordered(self.config.max_concurrent_repositories.max(1))
            .collect()
            .await;

        let finished_at = utc_now();
        {
            let mut states = self.states.write().await;
            for report in &repositories {
                states
                    .entry(report.name.clone())
                    .or_insert_with(|| RepositoryState::new(&report.name))
                    .apply(&report.outcome, finished_at);
            }
        }

        // Keep configuration order regardless of completion order
        let mut repositories = repositories;
        repositories.sort_by_key(|report| {
            self.repositories
                .iter()
                .position(|r| r.name == report.name)
                .unwrap_or(usize::MAX)
        });

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at,
            cancelled: cancel.is_cancelled(),
            repositories,
        };

        let elapsed = timer.elapsed();
        let duration = Duration::from_millis(elapsed.as_millis() as u64);
        self.metrics
            .record_cycle("completed", Some(elapsed.as_secs_f64()));
        info!(
            reconciled = report.reconciled(),
            failed = report.failed(),
            cancelled = report.cancelled,
            duration = %humantime::format_duration(duration),
            "Collection cycle finished"
        );

        Ok(report)
    }

    async fn check_store(&self) -> Result<()> {
        let timeout = self.reconciler.store_timeout();
        match tokio::time::timeout(timeout, self.reconciler.db().health_check()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Database(format!(
                "store health check exceeded {}",
                humantime::format_duration(timeout)
            ))),
        }
    }

    async fn run_unit(
        &self,
        repository: &ScheduledRepository,
        cancel: &CancellationToken,
    ) -> RepositoryReport {
        let outcome = if cancel.is_cancelled() {
            debug!(repository = %repository.name, "Cycle cancelled before repository started");
            RepositoryOutcome::Cancelled
        } else {
            self.process(repository, cancel).await
        };

        self.metrics
            .record_repository(&repository.name, outcome.label());

        RepositoryReport {
            name: repository.name.clone(),
            outcome,
        }
    }

    async fn process(
        &self,
        repository: &ScheduledRepository,
        cancel: &CancellationToken,
    ) -> RepositoryOutcome {
        let target = match repository.target() {
            Ok(target) => target,
            Err(e) => {
                if self
                    .reported_missing
                    .lock()
                    .await
                    .insert(repository.name.clone())
                {
                    warn!(repository = %repository.name, "Repository has no path configured");
                }
                return failed(e);
            }
        };

        // The fetch is read-only and may be abandoned; a reconcile that has
        // started always runs to commit or rollback.
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => {
                info!(repository = %repository.name, "Snapshot fetch cancelled");
                return RepositoryOutcome::Cancelled;
            }
            fetched = self.source.fetch(&target) => match fetched {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(repository = %repository.name, error = %e, "Snapshot fetch failed");
                    return failed(e);
                }
            }
        };

        match self.reconciler.reconcile(&target, &snapshot).await {
            Ok(result) => {
                self.metrics.record_success(
                    &repository.name,
                    result.inserted as u64,
                    utc_now().timestamp(),
                );
                RepositoryOutcome::Reconciled {
                    inserted: result.inserted,
                    skipped: result.skipped,
                    malformed: result.failures.len(),
                }
            }
            Err(e) => {
                warn!(repository = %repository.name, error = %e, "Reconcile failed");
                failed(e)
            }
        }
    }

    /// Run cycles on the configured interval until cancelled
    ///
    /// The first cycle starts immediately. Returns an error when the store
    /// becomes unreachable.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cycle scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.run_cycle(&cancel).await?;
                }
            }
        }
    }
}

fn failed(error: Error) -> RepositoryOutcome {
    RepositoryOutcome::Failed {
        kind: error.kind(),
        message: error.to_string(),
    }
}
