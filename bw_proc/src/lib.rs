//! ABOUTME: Process runner for backup tool invocations with timeouts and logging
//! ABOUTME: Bounds borgmatic and container runtime calls so one repository cannot stall a cycle

use bw_core::{Error, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    time::timeout,
};
use tracing::{debug, info, instrument, warn};

/// Maximum bytes to capture from stdout/stderr
///
/// `borgmatic info --json` on a repository with thousands of archives is
/// several megabytes, so the default is generous.
const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024 * 1024;

/// Command specification for process execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute, resolved through PATH when relative
    pub program: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Timeout for command execution
    pub timeout: Duration,
    /// Time to wait for the process to exit after it was killed
    pub kill_after: Duration,
    /// Maximum bytes to capture from stdout
    pub stdout_limit: usize,
    /// Maximum bytes to capture from stderr
    pub stderr_limit: usize,
}

impl CommandSpec {
    /// Create a new command spec with default timeout settings
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(300),
            kill_after: Duration::from_secs(10),
            stdout_limit: DEFAULT_OUTPUT_LIMIT,
            stderr_limit: 64 * 1024,
        }
    }

    /// Add command line arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Add a single environment variable
    pub fn env_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set timeout duration
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set kill grace period after timeout
    pub fn kill_after(mut self, kill_after: Duration) -> Self {
        self.kill_after = kill_after;
        self
    }

    /// Cap captured stdout
    pub fn stdout_limit(mut self, limit: usize) -> Self {
        self.stdout_limit = limit;
        self
    }

    /// Short program name for logs and metric labels
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Render the invocation for log lines
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Result of command execution
#[derive(Debug)]
pub struct CommandResult {
    /// Exit status, absent when the process was killed after a timeout
    pub status: Option<ExitStatus>,
    /// Captured stdout (bounded)
    pub stdout: String,
    /// Captured stderr (bounded)
    pub stderr: String,
    /// Total execution duration
    pub duration: Duration,
    /// Whether the command was killed due to timeout
    pub timed_out: bool,
    /// Whether stdout was truncated due to size limits
    pub stdout_truncated: bool,
}

impl CommandResult {
    /// Check if the command exited with code 0 within its timeout
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Get the exit code if available
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Turn a non-successful run into a `SourceUnavailable` error carrying stderr
    pub fn into_success(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        if self.timed_out {
            return Err(Error::SourceUnavailable(format!(
                "{} timed out after {:.1}s",
                program,
                self.duration.as_secs_f64()
            )));
        }
        let stderr = self.stderr.trim();
        Err(Error::SourceUnavailable(format!(
            "{} exited with code {}: {}",
            program,
            self.exit_code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            if stderr.is_empty() { "<no stderr>" } else { stderr }
        )))
    }
}

/// Run a command according to the specification
///
/// Spawn failures are reported as `SourceUnavailable`. A timeout is not an
/// error here: the result comes back with `timed_out` set so callers decide.
#[instrument(skip(spec), fields(program = %spec.program.display()))]
pub async fn run(spec: CommandSpec) -> Result<CommandResult> {
    let start = Instant::now();
    let program_name = spec.program_name();

    debug!(
        command = %spec.display(),
        timeout_secs = spec.timeout.as_secs(),
        "Starting command execution"
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        Error::SourceUnavailable(format!(
            "Failed to spawn {}: {}",
            spec.program.display(),
            e
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::SourceUnavailable("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::SourceUnavailable("Failed to capture stderr".to_string()))?;

    let stdout_task = capture_stream(stdout, spec.stdout_limit, "stdout", false);
    let stderr_task = capture_stream(stderr, spec.stderr_limit, "stderr", true);

    let execution = timeout(spec.timeout, async {
        let (status, stdout, stderr) = tokio::join!(child.wait(), stdout_task, stderr_task);
        (status, stdout, stderr)
    })
    .await;

    let result = match execution {
        Ok((status, (stdout, stdout_truncated), (stderr, _))) => {
            let status = status.map_err(|e| {
                Error::SourceUnavailable(format!("Failed to wait for {}: {}", program_name, e))
            })?;
            CommandResult {
                status: Some(status),
                stdout,
                stderr,
                duration: start.elapsed(),
                timed_out: false,
                stdout_truncated,
            }
        }
        Err(_) => {
            warn!(
                timeout_secs = spec.timeout.as_secs(),
                "Command timed out, killing process"
            );
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to send kill signal to process");
            }
            let status = match timeout(spec.kill_after, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                _ => {
                    warn!("Process did not exit within the kill grace period");
                    None
                }
            };
            CommandResult {
                status,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
                timed_out: true,
                stdout_truncated: false,
            }
        }
    };

    histogram!("borg_command_duration_seconds", "program" => program_name.clone())
        .record(result.duration.as_secs_f64());

    if result.timed_out {
        counter!("borg_command_timeout_total", "program" => program_name.clone()).increment(1);
    } else if result.success() {
        counter!("borg_command_success_total", "program" => program_name.clone()).increment(1);
    } else {
        counter!("borg_command_failure_total",
            "program" => program_name.clone(),
            "exit_code" => result.exit_code().unwrap_or(-1).to_string())
        .increment(1);
    }

    if result.success() {
        info!(
            duration_ms = result.duration.as_millis() as u64,
            stdout_bytes = result.stdout.len(),
            "Command completed successfully"
        );
    } else {
        warn!(
            duration_ms = result.duration.as_millis() as u64,
            exit_code = result.exit_code(),
            timed_out = result.timed_out,
            "Command failed or timed out"
        );
    }

    Ok(result)
}

/// Read a child stream line by line up to `limit` bytes
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the read.
async fn capture_stream<R>(
    stream: R,
    limit: usize,
    stream_name: &str,
    log_lines: bool,
) -> (String, bool)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut output = String::new();
    let mut buf = Vec::new();
    let mut truncated = false;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if log_lines && !line.trim().is_empty() {
                    debug!(stream = stream_name, line = %line.trim_end(), "Process output");
                }
                if truncated {
                    // Keep draining so the child never blocks on a full pipe
                    continue;
                }
                let remaining = limit.saturating_sub(output.len());
                if line.len() > remaining {
                    let mut cut = remaining;
                    while !line.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    output.push_str(&line[..cut]);
                    truncated = true;
                } else {
                    output.push_str(&line);
                }
            }
            Err(e) => {
                debug!(stream = stream_name, error = %e, "Error reading from stream");
                break;
            }
        }
    }

    if truncated {
        debug!(stream = stream_name, captured_bytes = output.len(), limit, "Output truncated");
    }

    (output, truncated)
}
