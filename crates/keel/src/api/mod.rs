//! API route handlers

pub mod error;
pub mod progress;
pub mod system;

pub use error::ApiError;
