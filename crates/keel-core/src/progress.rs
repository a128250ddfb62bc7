//! Shared progress state of one provisioning run
//!
//! Created once by the hosting process and handed to both the pipeline and the
//! HTTP server. Messages only ever grow, and the completion flag flips once.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use keel_api::{ProgressStatus, StatusEvent};

use crate::engine::Deliverable;

#[derive(Debug, Default)]
struct Inner {
    complete: bool,
    completed_successfully: bool,
    messages: Vec<StatusEvent>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    deliverables: BTreeMap<String, PathBuf>,
}

/// Cloneable handle to the progress of a run
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    inner: Arc<Mutex<Inner>>,
}

impl ProgressState {
    /// Create an empty, incomplete state stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        let state = Self::default();
        state.lock().started_at = Some(Utc::now());
        state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so poisoning is ignored.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append one message
    pub fn append(&self, event: StatusEvent) {
        let mut inner = self.lock();
        if inner.complete {
            warn!(msg = %event.msg, "appending to a completed run");
        }
        inner.messages.push(event);
    }

    /// Mark the run finished; returns `false` if it was already finished
    pub fn complete(&self, success: bool) -> bool {
        let mut inner = self.lock();
        if inner.complete {
            return false;
        }
        inner.complete = true;
        inner.completed_successfully = success;
        inner.finished_at = Some(Utc::now());
        info!(success, messages = inner.messages.len(), "run complete");
        true
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Number of messages appended so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy for readers
    #[must_use]
    pub fn snapshot(&self) -> ProgressStatus {
        let inner = self.lock();
        ProgressStatus {
            complete: inner.complete,
            completed_successfully: inner.completed_successfully,
            messages: inner.messages.clone(),
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }

    /// Register an artifact for download
    pub fn add_deliverable(&self, deliverable: Deliverable) {
        self.lock()
            .deliverables
            .insert(deliverable.name, deliverable.path);
    }

    /// Look up a registered artifact
    #[must_use]
    pub fn deliverable(&self, name: &str) -> Option<PathBuf> {
        self.lock().deliverables.get(name).cloned()
    }

    /// Names of all registered artifacts
    #[must_use]
    pub fn deliverable_names(&self) -> Vec<String> {
        self.lock().deliverables.keys().cloned().collect()
    }
}
