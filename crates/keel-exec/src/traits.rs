//! Command runner trait

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandResult, CommandSpec};

/// Runs external command-line collaborators
///
/// `run` only fails when the process cannot be started or waited on; the
/// checked variants turn an unsuccessful outcome into [`ExecError::CommandFailed`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError>;

    /// Get runner type name
    fn runner_type(&self) -> &'static str;

    /// Run a command; a non-zero exit is a failure
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        let result = self.run(spec).await?;
        if !result.success() {
            return Err(ExecError::CommandFailed {
                command: spec.to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    /// Run a command; a non-zero exit or any stderr output is a failure
    async fn run_strict(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        let result = self.run(spec).await?;
        if !result.success() || !result.stderr.trim().is_empty() {
            return Err(ExecError::CommandFailed {
                command: spec.to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}
