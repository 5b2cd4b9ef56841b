//! ABOUTME: Cycle scheduler tests against a scripted snapshot source and a real store
//! ABOUTME: Covers fault isolation, overlap refusal, cancellation, and store outages

use async_trait::async_trait;
use bw_collector::Reconciler;
use bw_core::{Error, FailureKind, Result};
use bw_db::Db;
use bw_obs::Metrics;
use bw_scheduler::{
    CycleOutcome, CycleScheduler, RepositoryOutcome, ScheduledRepository, SchedulerConfig,
    SchedulerPhase,
};
use bw_source::{parse_info, RepositoryTarget, SnapshotSource, SourceSnapshot};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

enum Script {
    Info(String),
    Unavailable,
    Garbage,
    /// Wait for the gate before answering
    Gated(String),
    /// Cancel the cycle, then never answer
    CancelAndHang,
}

struct ScriptedSource {
    scripts: HashMap<String, Script>,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    fn new(scripts: Vec<(&str, Script)>, cancel: CancellationToken) -> Self {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(name, script)| (name.to_string(), script))
                .collect(),
            gate: Arc::new(Semaphore::new(0)),
            cancel,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, target: &RepositoryTarget) -> Result<SourceSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&target.name) {
            Some(Script::Info(output)) => parse_info(output, &target.path),
            Some(Script::Unavailable) => Err(Error::SourceUnavailable(
                "borgmatic exited with status 2".into(),
            )),
            Some(Script::Garbage) => parse_info("Traceback (most recent call last):", &target.path),
            Some(Script::Gated(output)) => {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| Error::SourceUnavailable(e.to_string()))?;
                parse_info(output, &target.path)
            }
            Some(Script::CancelAndHang) => {
                self.cancel.cancel();
                std::future::pending::<Result<SourceSnapshot>>().await
            }
            None => Err(Error::SourceUnavailable(format!(
                "no script for {}",
                target.name
            ))),
        }
    }
}

fn info(location: &str, hashes: &[&str]) -> String {
    let archives = hashes
        .iter()
        .enumerate()
        .map(|(i, hash)| {
            test_support::archive_json(
                &format!("nas-{}", hash),
                hash,
                &format!("2024-01-{:02}T02:00:00.000000", 10 + i),
                &format!("2024-01-{:02}T02:10:00.000000", 10 + i),
                1_000_000,
            )
        })
        .collect();
    test_support::info_json(&format!("id-{}", location), location, archives)
}

fn repo(name: &str) -> ScheduledRepository {
    ScheduledRepository::new(name, Some(format!("/mnt/{}", name)))
}

struct Harness {
    db: Db,
    source: Arc<ScriptedSource>,
    metrics: Arc<Metrics>,
    scheduler: CycleScheduler,
    _dir: TempDir,
}

async fn harness(
    repositories: Vec<ScheduledRepository>,
    scripts: Vec<(&str, Script)>,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.db");
    let db = Db::new(path.to_str().unwrap()).await.unwrap();
    let reconciler = Arc::new(Reconciler::new(db.clone(), Duration::from_secs(10)));
    let source = Arc::new(ScriptedSource::new(scripts, cancel.clone()));
    let metrics = Arc::new(Metrics::new());
    let scheduler = CycleScheduler::new(
        SchedulerConfig {
            interval: Duration::from_millis(50),
            max_concurrent_repositories: max_concurrent,
        },
        repositories,
        source.clone(),
        reconciler,
        metrics.clone(),
    );
    Harness {
        db,
        source,
        metrics,
        scheduler,
        _dir: dir,
    }
}

async fn repository_count(db: &Db) -> i64 {
    db.stats().await.unwrap().table_counts["repositories"]
}

#[tokio::test]
async fn failing_repositories_do_not_affect_siblings() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![
            repo("main"),
            repo("offsite"),
            repo("broken"),
            ScheduledRepository::new("unset", None),
        ],
        vec![
            ("main", Script::Info(info("/mnt/main", &["h1", "h2"]))),
            ("offsite", Script::Unavailable),
            ("broken", Script::Garbage),
        ],
        4,
        &cancel,
    )
    .await;

    let CycleOutcome::Completed(report) = h.scheduler.run_cycle(&cancel).await.unwrap() else {
        panic!("cycle should run");
    };

    assert_eq!(report.repositories.len(), 4);
    let names: Vec<_> = report.repositories.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["main", "offsite", "broken", "unset"]);
    assert!(!report.cancelled);

    assert_eq!(
        report.outcome_of("main"),
        Some(&RepositoryOutcome::Reconciled {
            inserted: 2,
            skipped: 0,
            malformed: 0
        })
    );
    let kind_of = |name: &str| match report.outcome_of(name) {
        Some(RepositoryOutcome::Failed { kind, .. }) => Some(*kind),
        _ => None,
    };
    assert_eq!(kind_of("offsite"), Some(FailureKind::SourceUnavailable));
    assert_eq!(kind_of("broken"), Some(FailureKind::MalformedSnapshot));
    assert_eq!(kind_of("unset"), Some(FailureKind::ConfigurationMissing));
    assert_eq!(report.reconciled(), 1);
    assert_eq!(report.failed(), 3);

    // The unconfigured repository never reaches the source
    assert_eq!(h.source.fetches.load(Ordering::SeqCst), 3);
    assert_eq!(repository_count(&h.db).await, 1);
}

#[tokio::test]
async fn repository_state_accumulates_across_cycles() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main"), ScheduledRepository::new("unset", Some("".into()))],
        vec![("main", Script::Info(info("/mnt/main", &["h1"])))],
        2,
        &cancel,
    )
    .await;

    h.scheduler.run_cycle(&cancel).await.unwrap();
    let CycleOutcome::Completed(second) = h.scheduler.run_cycle(&cancel).await.unwrap() else {
        panic!("cycle should run");
    };

    assert_eq!(
        second.outcome_of("main"),
        Some(&RepositoryOutcome::Reconciled {
            inserted: 0,
            skipped: 1,
            malformed: 0
        })
    );

    let states = h.scheduler.repository_states().await;
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].name, "main");
    assert_eq!(states[0].consecutive_failures, 0);
    assert!(states[0].last_success_at.is_some());
    assert_eq!(states[1].name, "unset");
    assert_eq!(states[1].consecutive_failures, 2);
    assert!(states[1].last_success_at.is_none());
    assert!(states[1].last_attempt_at.is_some());
}

#[tokio::test]
async fn overlapping_cycle_is_skipped() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main")],
        vec![("main", Script::Gated(info("/mnt/main", &["h1"])))],
        1,
        &cancel,
    )
    .await;

    let first = h.scheduler.run_cycle(&cancel);
    let second = async {
        while !h.scheduler.phase().await.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let outcome = h.scheduler.run_cycle(&cancel).await.unwrap();
        h.source.gate.add_permits(1);
        outcome
    };

    let (first, second) = tokio::join!(first, second);

    assert_eq!(second, CycleOutcome::Skipped);
    let CycleOutcome::Completed(report) = first.unwrap() else {
        panic!("first cycle should complete");
    };
    assert_eq!(report.reconciled(), 1);
    assert_eq!(h.source.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.scheduler.phase().await, SchedulerPhase::Idle);

    let metrics = h.metrics.encode().unwrap();
    assert!(metrics.contains("borgwatch_cycles_total{outcome=\"skipped\"} 1"));
    assert!(metrics.contains("borgwatch_cycles_total{outcome=\"completed\"} 1"));
}

#[tokio::test]
async fn cancellation_keeps_committed_work() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main"), repo("offsite"), repo("later")],
        vec![
            ("main", Script::Info(info("/mnt/main", &["h1", "h2"]))),
            ("offsite", Script::CancelAndHang),
            ("later", Script::Info(info("/mnt/later", &["x1"]))),
        ],
        1,
        &cancel,
    )
    .await;

    let CycleOutcome::Completed(report) = h.scheduler.run_cycle(&cancel).await.unwrap() else {
        panic!("cycle should run");
    };

    assert!(report.cancelled);
    assert!(matches!(
        report.outcome_of("main"),
        Some(RepositoryOutcome::Reconciled { inserted: 2, .. })
    ));
    assert_eq!(report.outcome_of("offsite"), Some(&RepositoryOutcome::Cancelled));
    assert_eq!(report.outcome_of("later"), Some(&RepositoryOutcome::Cancelled));

    // "later" was never fetched
    assert_eq!(h.source.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(repository_count(&h.db).await, 1);
    assert_eq!(
        h.db.stats().await.unwrap().table_counts["backup_archives"],
        2
    );
}

#[tokio::test]
async fn unreachable_store_aborts_the_cycle() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main")],
        vec![("main", Script::Info(info("/mnt/main", &["h1"])))],
        1,
        &cancel,
    )
    .await;

    h.db.pool().close().await;

    let result = h.scheduler.run_cycle(&cancel).await;
    assert!(result.is_err());
    assert_eq!(h.source.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.scheduler.phase().await, SchedulerPhase::Idle);

    // The run loop escalates instead of retrying silently
    assert!(h.scheduler.run(cancel.clone()).await.is_err());

    let metrics = h.metrics.encode().unwrap();
    assert!(metrics.contains("borgwatch_cycles_total{outcome=\"aborted\"} 2"));
}

#[tokio::test]
async fn run_loop_repeats_until_cancelled() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main")],
        vec![("main", Script::Info(info("/mnt/main", &["h1"])))],
        1,
        &cancel,
    )
    .await;

    let stopper = async {
        while h.source.fetches.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(h.scheduler.run(cancel.clone()), stopper);
    assert!(result.is_ok());

    let states = h.scheduler.repository_states().await;
    assert!(states[0].last_success_at.is_some());
    assert_eq!(repository_count(&h.db).await, 1);
}

#[tokio::test]
async fn cancelled_run_loop_finishes_in_flight_reconcile() {
    let cancel = CancellationToken::new();
    let h = harness(
        vec![repo("main")],
        vec![("main", Script::Info(info("/mnt/main", &["h1", "h2"])))],
        1,
        &cancel,
    )
    .await;

    // Hold the write lock so the reconcile is parked inside the store
    let mut blocker = h.db.pool().begin().await.unwrap();
    sqlx::query(
        "INSERT INTO repositories (name, path, location_type, created_at, updated_at)
         VALUES ('blocker', '/tmp', 'local', 'now', 'now')",
    )
    .execute(&mut *blocker)
    .await
    .unwrap();

    let driver = async {
        while h.source.fetches.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        blocker.rollback().await.unwrap();
    };

    let (result, ()) = tokio::join!(h.scheduler.run(cancel.clone()), driver);
    assert!(result.is_ok());

    let states = h.scheduler.repository_states().await;
    assert!(states[0].last_success_at.is_some());
    assert_eq!(repository_count(&h.db).await, 1);
    assert_eq!(
        h.db.stats().await.unwrap().table_counts["backup_archives"],
        2
    );
}
