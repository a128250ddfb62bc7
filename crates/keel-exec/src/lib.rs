//! keel-exec: Command execution and the bootstrap transport
//!
//! Provides the external command collaborator used by engine stages, the
//! required-command lookup, and the raw two-port TCP transport used to deliver
//! and start the provisioner on a freshly created bootstrap VM.

pub mod error;
pub mod local;
pub mod required;
pub mod result;
pub mod traits;
pub mod transport;

pub use error::ExecError;
pub use local::LocalRunner;
pub use required::missing_commands;
pub use result::{CommandResult, CommandSpec};
pub use traits::CommandRunner;
pub use transport::BootstrapTransport;
