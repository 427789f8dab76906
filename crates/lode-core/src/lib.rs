//! Lode core crate - error taxonomy, configuration, and shared value types.
//!
//! Every other lode crate depends on this one. Subsystems report failures
//! through [`LodeError`] so that the `?` operator works across crate
//! boundaries and the binary can map fatal conditions to exit codes.

pub mod config;
pub mod error;
pub mod types;

pub use config::LodeConfig;
pub use error::{LodeError, Result};
pub use types::*;
