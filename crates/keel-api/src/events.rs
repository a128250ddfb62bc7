//! Status event types

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Category tag carried by every stage progress event
pub const PROGRESS: &str = "progress";

/// Severity of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Debug => write!(f, "debug"),
            Level::Info => write!(f, "info"),
        }
    }
}

/// One unit of human-readable progress information
///
/// Encoded as `{"type": ..., "msg": ..., "level": ...}` on every transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusEvent {
    /// Category tag, e.g. `progress`
    #[serde(rename = "type")]
    pub kind: String,
    /// Human text
    pub msg: String,
    /// Severity
    pub level: Level,
}

impl StatusEvent {
    /// Create a progress event at the given level
    pub fn new(level: Level, msg: impl Into<String>) -> Self {
        Self {
            kind: PROGRESS.to_string(),
            msg: msg.into(),
            level,
        }
    }

    /// Create an info-level progress event
    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(Level::Info, msg)
    }

    /// Create a debug-level progress event
    pub fn debug(msg: impl Into<String>) -> Self {
        Self::new(Level::Debug, msg)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.msg)
    }
}
