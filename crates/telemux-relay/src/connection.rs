//! A single attached consumer.
//!
//! The connection owns only the outbound half of the transport, behind the
//! [`ConsumerSink`] trait. The inbound half stays with the acceptor's read
//! loop, which is the only place that can observe a remote close. Closing
//! the connection cancels its [`close_token`](ConsumerConnection::close_token)
//! so that read loop lets go of the inbound half too.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Message;

/// Boxed transport error carried by [`DeliveryError::Write`].
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of a consumer connection, unique for the life of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Why a write to one consumer did not happen.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,

    #[error("write did not complete within {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Write(#[source] SinkError),
}

/// Outbound half of a consumer transport.
#[async_trait]
pub trait ConsumerSink: Send {
    /// Write one payload as one frame.
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError>;

    /// Close the transport. Called at most once.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// One attached downstream consumer.
pub struct ConsumerConnection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    connected_at: Instant,
    closed: AtomicBool,
    close_token: CancellationToken,
    sink: Mutex<Box<dyn ConsumerSink>>,
}

impl ConsumerConnection {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, sink: impl ConsumerSink + 'static) -> Self {
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            sink: Mutex::new(Box::new(sink)),
        }
    }

    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancelled as soon as [`close`](Self::close) starts, before the
    /// transport close is attempted.
    pub const fn close_token(&self) -> &CancellationToken {
        &self.close_token
    }

    /// Write `message` to this consumer, giving up after `deadline`.
    ///
    /// The deadline covers waiting for the sink as well as the write itself.
    pub async fn deliver(&self, message: &Message, deadline: Duration) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(message.payload().clone()).await
        };
        match timeout(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Write(e)),
            Err(_) => Err(DeliveryError::Timeout(deadline)),
        }
    }

    /// Close the underlying transport, best effort.
    ///
    /// The close token fires first, so the inbound half is released even
    /// when a stalled peer keeps the outbound close from completing.
    /// Returns `true` only for the call that actually performed the close;
    /// every later call is a no-op returning `false`.
    pub async fn close(&self, deadline: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_token.cancel();
        let shutdown = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match timeout(deadline, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Consumer close failed");
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Consumer close timed out");
            }
        }
        true
    }
}

impl fmt::Debug for ConsumerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
