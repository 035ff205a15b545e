//! telemux Relay Server Library
//!
//! Relays a single producer's UDP telemetry datagrams to every attached
//! WebSocket consumer:
//! - Datagram ingestion with a configurable size limit
//! - Bounded FIFO dispatcher between ingestion and delivery
//! - Connection registry for attached consumers
//! - Fan-out broadcaster with per-consumer eviction
//! - WebSocket acceptor and health endpoint

pub mod acceptor;
pub mod broadcaster;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod routes;
pub mod server;
pub mod stats;

#[cfg(test)]
mod test_helpers;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use connection::{ConnectionId, ConsumerConnection, ConsumerSink};
pub use dispatch::{DispatchReceiver, DispatchSender, Message};
pub use error::RelayError;
pub use registry::ConnectionRegistry;
pub use server::RelayServer;
pub use stats::{RelayStats, StatsSnapshot};
