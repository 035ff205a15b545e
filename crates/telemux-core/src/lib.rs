//! `telemux` Core Library
//!
//! Shared functionality for `telemux` components:
//! - Relay configuration resolution (defaults, JSON file, environment)
//! - Common error types
//! - Tracing subscriber initialisation

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::RelayConfig;
pub use error::{Error, Result};
