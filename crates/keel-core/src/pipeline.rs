//! Provisioning pipeline
//!
//! Runs the stages of one [`Engine`] strictly in order and records the
//! outcome in a shared [`ProgressState`].

use std::fmt;

use tracing::{error, info, instrument, warn};

use keel_api::StatusEvent;

use crate::engine::Engine;
use crate::error::CoreError;
use crate::progress::ProgressState;

/// The five engine stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    CreateBootstrap,
    InstallControlPlane,
    CreatePermanent,
    PivotControlPlane,
    InstallAddons,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::CreateBootstrap,
        StageName::InstallControlPlane,
        StageName::CreatePermanent,
        StageName::PivotControlPlane,
        StageName::InstallAddons,
    ];

    /// Progress message recorded when the stage finishes
    #[must_use]
    pub fn completion_message(self) -> &'static str {
        match self {
            StageName::CreateBootstrap => "Bootstrap cluster created",
            StageName::InstallControlPlane => "Control plane components installed",
            StageName::CreatePermanent => "Permanent management cluster created",
            StageName::PivotControlPlane => "Move to Permanent management cluster complete",
            StageName::InstallAddons => "Addon installation complete",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::CreateBootstrap => "CreateBootstrap",
            StageName::InstallControlPlane => "InstallControlPlane",
            StageName::CreatePermanent => "CreatePermanent",
            StageName::PivotControlPlane => "PivotControlPlane",
            StageName::InstallAddons => "InstallAddons",
        };
        f.write_str(name)
    }
}

pub struct Pipeline<E: Engine> {
    engine: E,
    progress: ProgressState,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(engine: E, progress: ProgressState) -> Self {
        Self { engine, progress }
    }

    async fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.engine.events().publish(event).await {
            warn!(error = %e, "failed to publish pipeline event");
        }
    }

    /// Run every stage once, stopping at the first failure
    ///
    /// Missing required commands fail the run before any stage starts. On
    /// failure the error text is published, appended to the progress state and
    /// returned unchanged; later stages are never invoked.
    ///
    /// # Errors
    /// Returns [`CoreError::MissingCommands`] or the first stage error.
    #[instrument(skip(self), fields(engine = %self.engine.name()))]
    pub async fn run(&mut self) -> Result<(), CoreError> {
        let result = self.run_stages().await;

        match &result {
            Ok(()) => {
                for deliverable in self.engine.deliverables() {
                    self.progress.add_deliverable(deliverable);
                }
                self.progress.complete(true);
                info!("pipeline finished");
            }
            Err(e) => {
                error!(error = %e, "pipeline failed");
                let event = StatusEvent::info(e.to_string());
                self.progress.append(event.clone());
                self.publish(event).await;
                self.progress.complete(false);
            }
        }
        result
    }

    async fn run_stages(&mut self) -> Result<(), CoreError> {
        let missing = self.engine.required_commands();
        if !missing.is_empty() {
            return Err(CoreError::MissingCommands(missing));
        }

        for stage in StageName::ALL {
            info!(stage = %stage, "stage started");
            self.publish(StatusEvent::info(format!("{stage} started"))).await;

            match stage {
                StageName::CreateBootstrap => self.engine.create_bootstrap().await?,
                StageName::InstallControlPlane => self.engine.install_control_plane().await?,
                StageName::CreatePermanent => self.engine.create_permanent().await?,
                StageName::PivotControlPlane => self.engine.pivot_control_plane().await?,
                StageName::InstallAddons => self.engine.install_addons().await?,
            }

            let done = StatusEvent::info(stage.completion_message());
            self.progress.append(done.clone());
            self.publish(done).await;
        }
        Ok(())
    }
}
