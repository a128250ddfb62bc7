//! Engine contract
//!
//! An engine turns a [`Spec`](crate::config::Spec) into a running management
//! cluster through five ordered stages. The [`Pipeline`](crate::pipeline::Pipeline)
//! is the only caller and never runs two stages at once.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keel_exec::CommandRunner;

use crate::config::{EngineSpec, Spec};
use crate::engines::capv::CapvEngine;
use crate::engines::rke::RkeEngine;
use crate::error::CoreError;
use crate::events::EventBus;

/// An artifact produced by a run that a remote operator can pull back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub name: String,
    pub path: PathBuf,
}

impl Deliverable {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Stage-by-stage provisioning contract
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short engine name used in logs
    fn name(&self) -> &str;

    /// Required external commands that are not on `$PATH`
    fn required_commands(&self) -> Vec<String>;

    /// Bring up the temporary bootstrap cluster
    async fn create_bootstrap(&mut self) -> Result<(), CoreError>;

    /// Install the cluster-lifecycle controllers on the bootstrap cluster
    async fn install_control_plane(&mut self) -> Result<(), CoreError>;

    /// Create the permanent management cluster
    async fn create_permanent(&mut self) -> Result<(), CoreError>;

    /// Hand lifecycle ownership over to the permanent cluster
    async fn pivot_control_plane(&mut self) -> Result<(), CoreError>;

    /// Install optional addons on the permanent cluster
    async fn install_addons(&mut self) -> Result<(), CoreError>;

    /// Bus the engine publishes to
    fn events(&self) -> Arc<dyn EventBus>;

    /// Artifacts available after a successful run
    fn deliverables(&self) -> Vec<Deliverable> {
        Vec::new()
    }
}

/// The engines shipped with keel, selected by `engine.kind`
pub enum EngineKind {
    Capv(CapvEngine),
    Rke(RkeEngine),
}

impl EngineKind {
    /// Build the engine named by the spec
    ///
    /// # Errors
    /// Returns [`CoreError::Config`] if the spec is invalid or the working
    /// directory cannot be resolved.
    pub fn from_spec(
        spec: Spec,
        events: Arc<dyn EventBus>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, CoreError> {
        spec.validate()?;
        Ok(match spec.engine {
            EngineSpec::Capv(_) => Self::Capv(CapvEngine::new(spec, events, runner)?),
            EngineSpec::Rke(_) => Self::Rke(RkeEngine::new(spec, events, runner)?),
        })
    }
}

#[async_trait]
impl Engine for EngineKind {
    fn name(&self) -> &str {
        match self {
            Self::Capv(e) => e.name(),
            Self::Rke(e) => e.name(),
        }
    }

    fn required_commands(&self) -> Vec<String> {
        match self {
            Self::Capv(e) => e.required_commands(),
            Self::Rke(e) => e.required_commands(),
        }
    }

    async fn create_bootstrap(&mut self) -> Result<(), CoreError> {
        match self {
            Self::Capv(e) => e.create_bootstrap().await,
            Self::Rke(e) => e.create_bootstrap().await,
        }
    }

    async fn install_control_plane(&mut self) -> Result<(), CoreError> {
        match self {
            Self::Capv(e) => e.install_control_plane().await,
            Self::Rke(e) => e.install_control_plane().await,
        }
    }

    async fn create_permanent(&mut self) -> Result<(), CoreError> {
        match self {
            Self::Capv(e) => e.create_permanent().await,
            Self::Rke(e) => e.create_permanent().await,
        }
    }

    async fn pivot_control_plane(&mut self) -> Result<(), CoreError> {
        match self {
            Self::Capv(e) => e.pivot_control_plane().await,
            Self::Rke(e) => e.pivot_control_plane().await,
        }
    }

    async fn install_addons(&mut self) -> Result<(), CoreError> {
        match self {
            Self::Capv(e) => e.install_addons().await,
            Self::Rke(e) => e.install_addons().await,
        }
    }

    fn events(&self) -> Arc<dyn EventBus> {
        match self {
            Self::Capv(e) => e.events(),
            Self::Rke(e) => e.events(),
        }
    }

    fn deliverables(&self) -> Vec<Deliverable> {
        match self {
            Self::Capv(e) => e.deliverables(),
            Self::Rke(e) => e.deliverables(),
        }
    }
}
