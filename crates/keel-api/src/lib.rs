//! keel-api: Shared wire types
//!
//! Status events, progress snapshots and deliverable listings exchanged between
//! the provisioning process, its HTTP progress endpoint, the broker and remote pollers.

pub mod events;
pub mod responses;

pub use events::{Level, StatusEvent};
pub use responses::{DeliverableInfo, HealthResponse, ProgressStatus};
