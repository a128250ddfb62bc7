//! Core error types for keel-core

use std::time::Duration;

use keel_exec::ExecError;
use thiserror::Error;

/// Errors raised by the pipeline, engines, event bus and poller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Required external tools are not on `$PATH`; the pipeline never starts
    #[error("the following commands were not found in $PATH: [{}]", .0.join(", "))]
    MissingCommands(Vec<String>),

    /// External command or bootstrap transport failure
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// A poll deadline passed without the expected condition
    #[error("timeout after {timeout:?} waiting for {resource} with condition {key}={expected}")]
    Timeout {
        /// Resource being polled
        resource: String,
        /// Condition field inspected
        key: String,
        /// Value that never showed up
        expected: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Command output or API body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Management-plane API returned an error status
    #[error("management API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Management-plane request could not be sent
    #[error("HTTP error: {0}")]
    Http(String),

    /// Event bus failure
    #[error("event bus error: {0}")]
    Bus(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid or inconsistent spec
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other stage failure
    #[error("{0}")]
    Stage(String),
}

impl CoreError {
    /// Check if this is a prerequisite error
    #[must_use]
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, CoreError::MissingCommands(_))
    }

    /// Check if this is a poll timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Http(err.to_string())
    }
}
