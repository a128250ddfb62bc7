//! Shared scaffolding for engine stages

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use tracing::{debug, warn};

use keel_api::StatusEvent;
use keel_exec::{CommandResult, CommandRunner, CommandSpec};

use crate::error::CoreError;
use crate::events::EventBus;

/// Event bus and command runner handed to every stage
#[derive(Clone)]
pub struct StageContext {
    events: Arc<dyn EventBus>,
    runner: Arc<dyn CommandRunner>,
}

impl StageContext {
    pub fn new(events: Arc<dyn EventBus>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { events, runner }
    }

    /// The bus as a shared handle
    #[must_use]
    pub fn events(&self) -> Arc<dyn EventBus> {
        self.events.clone()
    }

    /// The bus as a borrowed trait object, for the pollers
    #[must_use]
    pub fn bus(&self) -> &dyn EventBus {
        self.events.as_ref()
    }

    async fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "failed to publish stage event");
        }
    }

    /// Publish an info event
    pub async fn info(&self, msg: impl Into<String>) {
        self.publish(StatusEvent::info(msg)).await;
    }

    /// Publish a debug event
    pub async fn debug(&self, msg: impl Into<String>) {
        self.publish(StatusEvent::debug(msg)).await;
    }

    /// Run a command; a non-zero exit fails the stage
    ///
    /// # Errors
    /// Returns [`CoreError::Exec`] if the command cannot start or exits non-zero.
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandResult, CoreError> {
        self.debug(format!("Running: {spec}")).await;
        Ok(self.runner.run_checked(&spec).await?)
    }

    /// Run a command; a non-zero exit or any stderr output fails the stage
    ///
    /// # Errors
    /// Returns [`CoreError::Exec`] if the command cannot start, exits non-zero
    /// or writes to stderr.
    pub async fn run_strict(&self, spec: CommandSpec) -> Result<CommandResult, CoreError> {
        self.debug(format!("Running: {spec}")).await;
        Ok(self.runner.run_strict(&spec).await?)
    }

    /// Run a command and return its trimmed stdout
    ///
    /// # Errors
    /// Same as [`StageContext::run`].
    pub async fn output(&self, spec: CommandSpec) -> Result<String, CoreError> {
        let result = self.runner.run_checked(&spec).await?;
        Ok(result.stdout.trim().to_string())
    }

    /// Turn a failure into a debug event and carry on
    pub async fn suppress<T, E: Display>(&self, context: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(context, error = %e, "suppressing error");
                self.debug(format!("Suppressing error {context}: {e}")).await;
                None
            }
        }
    }
}

/// `KUBECONFIG=<path>` environment for commands aimed at one cluster
#[must_use]
pub fn kubeconfig_env(path: &std::path::Path) -> BTreeMap<String, String> {
    BTreeMap::from([("KUBECONFIG".to_string(), path.display().to_string())])
}
