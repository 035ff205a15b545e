//! Relay server error types.

use std::net::SocketAddr;

/// Errors that stop the relay from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] telemux_core::Error),

    #[error("Failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
