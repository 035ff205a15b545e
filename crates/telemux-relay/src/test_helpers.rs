//! Shared test helpers for relay unit tests.
//!
//! In-memory [`ConsumerSink`] implementations so the registry and the
//! broadcaster can be exercised without real sockets.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::{ConsumerSink, SinkError};

/// Records every payload written to it. Clones share the same record.
#[derive(Clone, Default)]
pub struct MockSink {
    sent: Arc<Mutex<Vec<Bytes>>>,
    closes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails, like a socket closed by the peer.
    pub fn failing() -> Self {
        let sink = Self::new();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerSink for MockSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("broken pipe".into());
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A sink that never completes a write or a close, like a hung peer.
pub struct StalledSink;

#[async_trait]
impl ConsumerSink for StalledSink {
    async fn send(&mut self, _payload: Bytes) -> Result<(), SinkError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
