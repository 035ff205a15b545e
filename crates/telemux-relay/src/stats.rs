//! Lock-free relay counters.
//!
//! Every component bumps its own counters with relaxed atomics; the health
//! endpoint reads a point-in-time [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the ingestor, broadcaster and acceptor.
#[derive(Debug, Default)]
pub struct RelayStats {
    datagrams_received: AtomicU64,
    datagrams_truncated: AtomicU64,
    receive_errors: AtomicU64,
    messages_broadcast: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    consumers_accepted: AtomicU64,
    upgrade_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_truncated: u64,
    pub receive_errors: u64,
    pub messages_broadcast: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub consumers_accepted: u64,
    pub upgrade_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_datagram(&self, truncated: bool) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        if truncated {
            self.datagrams_truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed broadcast pass.
    pub fn record_pass(&self, delivered: usize, evicted: usize) {
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn record_accept(&self) {
        self.consumers_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upgrade_failure(&self) {
        self.upgrade_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_truncated: self.datagrams_truncated.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            messages_broadcast: self.messages_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            consumers_accepted: self.consumers_accepted.load(Ordering::Relaxed),
            upgrade_failures: self.upgrade_failures.load(Ordering::Relaxed),
        }
    }
}
