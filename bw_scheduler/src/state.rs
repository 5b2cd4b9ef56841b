//! ABOUTME: Explicit scheduler state: cycle phase, per-repository records, cycle reports
//! ABOUTME: Owned by the scheduler and handed out as clones for inspection

use bw_core::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a cycle is in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum SchedulerPhase {
    Idle,
    Running {
        cycle_id: String,
        started_at: DateTime<Utc>,
    },
}

impl SchedulerPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// What happened to one repository within one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RepositoryOutcome {
    Reconciled {
        inserted: usize,
        skipped: usize,
        malformed: usize,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
    Cancelled,
}

impl RepositoryOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reconciled { .. } => "reconciled",
            Self::Failed { kind, .. } => kind.as_str(),
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Running record for one configured repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    pub name: String,
    pub last_outcome: Option<RepositoryOutcome>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl RepositoryState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Fold a cycle outcome into the record
    ///
    /// Cancellation is neither a success nor a failure and leaves the
    /// counters alone.
    pub fn apply(&mut self, outcome: &RepositoryOutcome, at: DateTime<Utc>) {
        match outcome {
            RepositoryOutcome::Reconciled { .. } => {
                self.last_success_at = Some(at);
                self.consecutive_failures = 0;
            }
            RepositoryOutcome::Failed { .. } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            RepositoryOutcome::Cancelled => {}
        }
        self.last_attempt_at = Some(at);
        self.last_outcome = Some(outcome.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReport {
    pub name: String,
    pub outcome: RepositoryOutcome,
}

/// Summary of a finished cycle; one entry per configured repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub repositories: Vec<RepositoryReport>,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn outcome_of(&self, name: &str) -> Option<&RepositoryOutcome> {
        self.repositories
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    pub fn reconciled(&self) -> usize {
        self.repositories
            .iter()
            .filter(|r| matches!(r.outcome, RepositoryOutcome::Reconciled { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.repositories
            .iter()
            .filter(|r| r.outcome.is_failure())
            .count()
    }
}

/// Result of asking for a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running
    Skipped,
}
