//! keel-core: Provisioning pipeline, engines and event bus
//!
//! A [`Pipeline`] drives one [`Engine`] through its five stages. Engines
//! publish [`keel_api::StatusEvent`]s to an [`EventBus`] and wait on
//! eventually-consistent infrastructure with the pollers in [`poll`].

pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod events;
pub mod mgmt;
pub mod nats;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod stage;
pub mod workdir;

pub use config::{EngineSpec, Spec};
pub use engine::{Deliverable, Engine, EngineKind};
pub use engines::StageTimeouts;
pub use error::CoreError;
pub use events::{EventBus, EventHandler, LocalBus, Subscription, log_sink};
pub use mgmt::{ManagementApi, RancherClient};
pub use nats::NatsBus;
pub use pipeline::{Pipeline, StageName};
pub use poll::{PollSettings, retry_while_missing, wait_for_condition};
pub use progress::ProgressState;
pub use stage::StageContext;
pub use workdir::ClusterDir;
