//! Error types for keel-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running commands or talking to a bootstrap VM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Failed to connect to the bootstrap VM
    #[error("connection to {addr} failed: {reason}")]
    ConnectionFailed {
        /// Remote socket address
        addr: String,
        /// Underlying error text
        reason: String,
    },

    /// Command exited non-zero, or wrote to stderr where that counts as failure
    #[error("command `{command}` failed: status {status}, stderr: {stderr}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Upload wrote a different number of bytes than the source holds
    #[error("problem with transfer: wrote {written} of {expected} bytes")]
    TransferMismatch {
        /// Source file size
        expected: u64,
        /// Bytes accepted by the connection
        written: u64,
    },

    /// Socket error after the connection was established
    #[error("transport error: {0}")]
    Transport(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed { .. } | ExecError::Timeout { .. }
        )
    }

    /// Check if error came from the bootstrap transport
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed { .. }
                | ExecError::TransferMismatch { .. }
                | ExecError::Transport(_)
        )
    }
}
