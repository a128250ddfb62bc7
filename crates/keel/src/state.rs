//! Application state shared across HTTP handlers

use std::path::PathBuf;

use keel_core::ProgressState;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Progress of the run hosted by this process
    pub progress: ProgressState,
    /// File the run logs to
    pub log_file: PathBuf,
    /// Where the permanent cluster's kubeconfig is written
    pub kubeconfig: PathBuf,
}

impl AppState {
    /// Create new application state
    pub fn new(progress: ProgressState, log_file: PathBuf, kubeconfig: PathBuf) -> Self {
        Self {
            progress,
            log_file,
            kubeconfig,
        }
    }
}
