//! Child process execution with a hard timeout.

use crate::toolchain::CommandSpec;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Why an external tool invocation did not produce usable output.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("{tool} exited with {status}")]
    NonZeroExit { tool: String, status: ExitStatus },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of a finished process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs external tools, one invocation at a time per call.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self::new(Duration::from_secs(seconds))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is returned as a normal [`ToolOutput`]; the caller
    /// decides what it means. On timeout the child is killed.
    pub async fn run(&self, tool: &str, spec: &CommandSpec) -> Result<ToolOutput, ToolError> {
        debug!("Running {} (timeout {}s): {}", tool, self.timeout().as_secs(), spec);

        let mut command = spec.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = command.spawn().map_err(|source| ToolError::Spawn {
            program: spec.program().to_string(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let duration = start.elapsed();
        debug!("{} finished with {} in {:.1}s", tool, output.status, duration.as_secs_f64());

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        })
    }

    /// Like [`run`](Self::run) but a non-zero exit is an error.
    pub async fn run_checked(&self, tool: &str, spec: &CommandSpec) -> Result<ToolOutput, ToolError> {
        let output = self.run(tool, spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ToolError::NonZeroExit {
                tool: tool.to_string(),
                status: output.status,
            })
        }
    }
}
