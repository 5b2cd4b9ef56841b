//! ABOUTME: Snapshot sources that read repository state from borgmatic
//! ABOUTME: Provides the SnapshotSource trait and the direct/container implementations

use async_trait::async_trait;
use bw_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod borgmatic;
pub mod invocation;
pub mod parse;
pub mod snapshot;

pub use borgmatic::{BorgmaticSource, ContainerSource, DirectSource};
pub use invocation::{ContainerInvocation, DirectInvocation, Invoker};
pub use parse::{parse_configuration, parse_database_listing, parse_info};
pub use snapshot::{
    ArchiveCounters, CacheCounters, DatabaseDump, RawArchive, RawRepository, RetentionSettings,
    SourceConfiguration, SourceSnapshot,
};

/// A repository the collector should observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    /// Configured name, the repository's natural key in the store
    pub name: String,
    /// Path or URL handed to `borgmatic --repository`
    pub path: String,
}

impl RepositoryTarget {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Anything that can report the current state of a repository
///
/// Fails with `SourceUnavailable` when the tool cannot be reached or exits
/// non-zero, and `MalformedSnapshot` when its output cannot be understood.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short label for logs and metrics
    fn kind(&self) -> &'static str;

    async fn fetch(&self, target: &RepositoryTarget) -> Result<SourceSnapshot>;
}

#[async_trait]
impl<T: SnapshotSource + ?Sized> SnapshotSource for Arc<T> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    async fn fetch(&self, target: &RepositoryTarget) -> Result<SourceSnapshot> {
        (**self).fetch(target).await
    }
}
