//! Error types for the keel client

use thiserror::Error;

/// Errors that can occur when talking to a provisioning host
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// API returned an error status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from server
        message: String,
    },

    /// Writing a downloaded artifact failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote run finished without succeeding
    #[error("remote run finished unsuccessfully: {0}")]
    RunFailed(String),
}

impl ClientError {
    /// Check if the request may succeed when retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
