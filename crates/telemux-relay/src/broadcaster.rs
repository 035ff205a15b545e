//! Fan-out of dispatched messages to every registered consumer.
//!
//! One pass per message:
//! ```text
//! snapshot (locked) → concurrent deliver() with deadline → remove_all (locked) → close
//! ```
//! Passes never overlap, so every consumer sees messages in dispatch order.
//! A failed or timed-out consumer is evicted; the rest of the pass is
//! unaffected and there is no retry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::dispatch::{DispatchReceiver, Message};
use crate::registry::ConnectionRegistry;
use crate::stats::RelayStats;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sequence: u64,
    /// Consumers in the snapshot the pass started from.
    pub attempted: usize,
    pub delivered: usize,
    /// Consumers this pass removed from the registry.
    pub evicted: usize,
}

/// Drains the dispatcher and writes each message to all live consumers.
pub struct Broadcaster {
    registry: ConnectionRegistry,
    stats: Arc<RelayStats>,
    write_timeout: Duration,
}

impl Broadcaster {
    pub const fn new(
        registry: ConnectionRegistry,
        stats: Arc<RelayStats>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            stats,
            write_timeout,
        }
    }

    /// Run until `cancel` fires or the dispatcher's sender is dropped.
    pub async fn run(self, mut rx: DispatchReceiver, cancel: CancellationToken) {
        info!(write_timeout = ?self.write_timeout, "Broadcaster started");
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => {
                    info!("Broadcaster shutting down");
                    return;
                }
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                info!("Dispatcher closed, broadcaster stopping");
                return;
            };
            let report = self.broadcast(&message).await;
            if report.evicted > 0 {
                debug!(
                    sequence = report.sequence,
                    backlog = rx.backlog(),
                    "Pass evicted consumers"
                );
            }
        }
    }

    /// Deliver one message to every consumer registered when the pass starts.
    pub async fn broadcast(&self, message: &Message) -> BroadcastReport {
        let targets = self.registry.snapshot().await;
        let attempted = targets.len();

        let outcomes = join_all(targets.iter().map(|conn| async move {
            (conn, conn.deliver(message, self.write_timeout).await)
        }))
        .await;

        let mut failed: Vec<ConnectionId> = Vec::new();
        for (conn, outcome) in outcomes {
            if let Err(e) = outcome {
                let id = conn.id();
                warn!(
                    connection_id = %id,
                    peer = ?conn.peer(),
                    sequence = message.sequence(),
                    error = %e,
                    "Delivery failed, evicting consumer"
                );
                failed.push(id);
            }
        }
        let delivered = attempted - failed.len();

        let evicted = self.registry.remove_all(&failed).await;
        for conn in &evicted {
            conn.close(self.write_timeout).await;
        }

        self.stats.record_pass(delivered, evicted.len());
        debug!(
            sequence = message.sequence(),
            bytes = message.len(),
            attempted,
            delivered,
            evicted = evicted.len(),
            "Broadcast complete"
        );

        BroadcastReport {
            sequence: message.sequence(),
            attempted,
            delivered,
            evicted: evicted.len(),
        }
    }
}
