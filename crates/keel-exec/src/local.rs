//! Local command execution using `tokio::process`

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::{CommandResult, CommandSpec};
use crate::traits::CommandRunner;

/// Local command runner
///
/// Spawns the program directly with the spec's argument list and environment
/// layered over the inherited one. An optional per-command timeout kills the
/// child when exceeded.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    timeout: Option<Duration>,
}

impl LocalRunner {
    /// Create a runner without a per-command timeout
    #[must_use]
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set a per-command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[instrument(skip(self, spec), fields(command = %spec), level = "debug")]
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(envs = ?spec.envs.keys().collect::<Vec<_>>(), "executing local command");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{}: {e}", spec.program)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(status = status, duration = ?duration, "command completed");

        if !output.status.success() {
            error!(status = status, stderr = %stderr.trim(), "command failed");
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        let Some(limit) = self.timeout else {
            return self.execute(spec).await;
        };

        match timeout(limit, self.execute(spec)).await {
            Ok(result) => result,
            Err(_) => {
                error!(command = %spec, timeout = ?limit, "command timed out");
                Err(ExecError::Timeout { timeout: limit })
            }
        }
    }

    fn runner_type(&self) -> &'static str {
        "local"
    }
}
