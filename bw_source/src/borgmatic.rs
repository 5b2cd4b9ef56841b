//! ABOUTME: Snapshot source backed by the borgmatic CLI
//! ABOUTME: info is required; the database listing and config file are best-effort

use crate::{
    invocation::{ContainerInvocation, DirectInvocation, Invoker},
    parse::{parse_configuration, parse_database_listing, parse_info},
    snapshot::{DatabaseDump, SourceConfiguration, SourceSnapshot},
    RepositoryTarget, SnapshotSource,
};
use async_trait::async_trait;
use bw_core::{Error, Result};
use bw_proc::run;
use metrics::counter;
use tracing::{debug, info, instrument, warn};

/// Runs `borgmatic` on the host
pub type DirectSource = BorgmaticSource<DirectInvocation>;

/// Runs `borgmatic` inside a container
pub type ContainerSource = BorgmaticSource<ContainerInvocation>;

/// Glob handed to `borgmatic list --find` to locate database dumps
const DATABASE_DUMP_PATTERN: &str = "*borgmatic/*_databases";

/// borgmatic-backed snapshot source
#[derive(Debug, Clone)]
pub struct BorgmaticSource<I> {
    invoker: I,
    config_path: Option<String>,
    collect_database_dumps: bool,
}

impl<I: Invoker> BorgmaticSource<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            invoker,
            config_path: None,
            collect_database_dumps: true,
        }
    }

    /// Read source directories and retention from this borgmatic config file
    pub fn with_config_path(mut self, path: Option<String>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_database_dumps(mut self, enabled: bool) -> Self {
        self.collect_database_dumps = enabled;
        self
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    async fn borgmatic(&self, args: &[&str]) -> Result<String> {
        let spec = self
            .invoker
            .borgmatic(args.iter().map(|a| a.to_string()).collect());
        let display = spec.display();
        let result = run(spec).await?.into_success(&display)?;
        if result.stdout_truncated {
            return Err(Error::MalformedSnapshot(format!(
                "{} output exceeded the capture limit",
                display
            )));
        }
        Ok(result.stdout)
    }

    async fn fetch_info(&self, path: &str) -> Result<SourceSnapshot> {
        let output = self
            .borgmatic(&["info", "--json", "--repository", path])
            .await?;
        parse_info(&output, path)
    }

    async fn fetch_database_dumps(&self, path: &str) -> Vec<DatabaseDump> {
        let listing = self
            .borgmatic(&[
                "list",
                "--repository",
                path,
                "--archive",
                "latest",
                "--find",
                DATABASE_DUMP_PATTERN,
            ])
            .await;

        match listing {
            Ok(output) => parse_database_listing(&output),
            Err(e) => {
                warn!(repository = %path, error = %e, "Skipping database dump listing");
                Vec::new()
            }
        }
    }

    async fn fetch_configuration(&self) -> Option<SourceConfiguration> {
        let path = self.config_path.as_deref()?;
        let parsed = match self.invoker.read_file(path).await {
            Ok(contents) => parse_configuration(&contents),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(configuration) => Some(configuration),
            Err(e) => {
                warn!(config = %path, error = %e, "Skipping borgmatic configuration");
                None
            }
        }
    }
}

#[async_trait]
impl<I: Invoker> SnapshotSource for BorgmaticSource<I> {
    fn kind(&self) -> &'static str {
        self.invoker.label()
    }

    #[instrument(skip(self, target), fields(repository = %target.name))]
    async fn fetch(&self, target: &RepositoryTarget) -> Result<SourceSnapshot> {
        let mut snapshot = match self.fetch_info(&target.path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                counter!("snapshot_fetch_failures_total",
                    "invocation" => self.invoker.label(),
                    "kind" => e.kind().as_str())
                .increment(1);
                return Err(e);
            }
        };

        if self.collect_database_dumps && !snapshot.archives.is_empty() {
            snapshot.database_dumps = self.fetch_database_dumps(&target.path).await;
        }
        snapshot.configuration = self.fetch_configuration().await;

        debug!(
            archives = snapshot.archives.len(),
            dumps = snapshot.database_dumps.len(),
            has_configuration = snapshot.configuration.is_some(),
            "Snapshot assembled"
        );
        info!(archives = snapshot.archives.len(), "Fetched repository snapshot");
        counter!("snapshot_fetch_total", "invocation" => self.invoker.label()).increment(1);

        Ok(snapshot)
    }
}
