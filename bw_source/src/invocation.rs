//! ABOUTME: How borgmatic is reached: on the host or inside a container
//! ABOUTME: Builds process specs for the runner and reads the borgmatic config file

use async_trait::async_trait;
use bw_core::{Error, Result};
use bw_proc::{run, CommandSpec};
use std::{path::PathBuf, time::Duration};
use tracing::debug;

/// Default grace period between a timeout and the kill
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Turns a borgmatic argument vector into a runnable command
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Short label for logs and metrics
    fn label(&self) -> &'static str;

    /// Command that runs `borgmatic <args>`
    fn borgmatic(&self, args: Vec<String>) -> CommandSpec;

    /// Contents of a file as seen by borgmatic
    async fn read_file(&self, path: &str) -> Result<String>;
}

/// Runs borgmatic directly on this host
#[derive(Debug, Clone)]
pub struct DirectInvocation {
    pub borgmatic_bin: PathBuf,
    pub timeout: Duration,
}

impl DirectInvocation {
    pub fn new(borgmatic_bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            borgmatic_bin: borgmatic_bin.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Invoker for DirectInvocation {
    fn label(&self) -> &'static str {
        "direct"
    }

    fn borgmatic(&self, args: Vec<String>) -> CommandSpec {
        CommandSpec::new(self.borgmatic_bin.clone())
            .args(args)
            .timeout(self.timeout)
            .kill_after(KILL_GRACE)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        debug!(path, "Reading borgmatic configuration from host");
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Runs borgmatic inside a running container through `<runtime> exec`
#[derive(Debug, Clone)]
pub struct ContainerInvocation {
    /// `docker` or `podman`
    pub runtime: PathBuf,
    pub container: String,
    pub borgmatic_bin: String,
    pub timeout: Duration,
}

impl ContainerInvocation {
    pub fn new(
        runtime: impl Into<PathBuf>,
        container: impl Into<String>,
        borgmatic_bin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            container: container.into(),
            borgmatic_bin: borgmatic_bin.into(),
            timeout,
        }
    }

    fn exec(&self, program: &str, args: Vec<String>) -> CommandSpec {
        let mut argv = vec![
            "exec".to_string(),
            self.container.clone(),
            program.to_string(),
        ];
        argv.extend(args);

        CommandSpec::new(self.runtime.clone())
            .args(argv)
            .timeout(self.timeout)
            .kill_after(KILL_GRACE)
    }
}

#[async_trait]
impl Invoker for ContainerInvocation {
    fn label(&self) -> &'static str {
        "container"
    }

    fn borgmatic(&self, args: Vec<String>) -> CommandSpec {
        self.exec(&self.borgmatic_bin, args)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let spec = self.exec("cat", vec![path.to_string()]);
        let display = spec.display();
        let result = run(spec).await?.into_success(&display)?;
        if result.stdout_truncated {
            return Err(Error::MalformedSnapshot(format!(
                "{} produced more output than allowed",
                path
            )));
        }
        Ok(result.stdout)
    }
}
