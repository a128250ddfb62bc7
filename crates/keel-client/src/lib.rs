//! keel-client: HTTP client for a running provisioner
//!
//! Talks to the progress server of a `keel deploy --local` run, usually one
//! started on a bootstrap VM, and bridges its progress onto a local event bus.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keel_client::{HttpClient, ProgressBridge};
//! use keel_core::LocalBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new("http://10.0.0.50:8081")?;
//! let status = ProgressBridge::new(client, Arc::new(LocalBus::new()))
//!     .run()
//!     .await?;
//! println!("{} messages", status.messages.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;
pub mod poller;

pub use error::{ClientError, Result};
pub use http::HttpClient;
pub use poller::ProgressBridge;
