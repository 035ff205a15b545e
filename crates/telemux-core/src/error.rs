//! Error types for `telemux` core library.

use thiserror::Error;

/// Result type alias using `telemux` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `telemux` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
