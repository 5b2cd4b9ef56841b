//! ABOUTME: Reconciliation and aggregation pipeline over the repository store
//! ABOUTME: Merges snapshots transactionally, computes ratios, trends, and health

pub mod aggregator;
pub mod health;
pub mod read;
pub mod reconciler;
pub mod schema;

pub use aggregator::{ratio, Aggregator, Trend, TrendPoint};
pub use health::{evaluate, HealthStatus};
pub use read::{HealthCounts, ReadModel, RepositorySummary, StatsOverview};
pub use reconciler::{ArchiveFailure, ReconcileResult, Reconciler, RepositoryChange};
pub use schema::validate_archive;
