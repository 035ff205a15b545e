//! WebSocket acceptor: upgrades consumer requests, registers the resulting
//! connections and watches each one for disconnection.
//!
//! Consumers are not expected to send anything. The per-connection read loop
//! exists only to notice a close, a read error or the end of the stream, at
//! which point the connection is unregistered and closed. It also stops when
//! the broadcaster evicts the connection, so an evicted consumer's socket is
//! released even if the peer never reads or writes again.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConsumerConnection, ConsumerSink, SinkError};
use crate::routes::AppState;

/// Upper bound for frames a consumer may send; anything they send is ignored.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024;

/// Outbound half of an accepted WebSocket.
pub struct WsSink {
    inner: SplitSink<WebSocket, WsMessage>,
}

impl WsSink {
    pub const fn new(inner: SplitSink<WebSocket, WsMessage>) -> Self {
        Self { inner }
    }
}

/// Text frame for UTF-8 payloads, binary frame otherwise.
pub fn frame_for(payload: Bytes) -> WsMessage {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => WsMessage::Text(text),
        Err(_) => WsMessage::Binary(payload),
    }
}

#[async_trait]
impl ConsumerSink for WsSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), SinkError> {
        self.inner.send(frame_for(payload)).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.inner.close().await.map_err(Into::into)
    }
}

/// Why a consumer's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachReason {
    /// The consumer sent a close frame.
    PeerClosed,
    /// The stream ended without a close frame.
    StreamEnded,
    ReadError(String),
    /// The connection was closed from the relay side, e.g. evicted after a
    /// failed write.
    Evicted,
    Shutdown,
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::Evicted => f.write_str("evicted"),
            Self::Shutdown => f.write_str("relay shutting down"),
        }
    }
}

/// `GET {ws_path}`: upgrade to a WebSocket consumer. Any origin is accepted.
pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            state.stats.record_upgrade_failure();
            warn!(peer = %peer, error = %rejection, "WebSocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let stats = Arc::clone(&state.stats);
    upgrade
        .max_message_size(MAX_INBOUND_FRAME)
        .on_failed_upgrade(move |e| {
            stats.record_upgrade_failure();
            warn!(peer = %peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| serve_consumer(socket, peer, state))
}

/// Register an upgraded socket and run its read loop until it detaches.
pub async fn serve_consumer(socket: WebSocket, peer: SocketAddr, state: AppState) {
    if state.shutdown.is_cancelled() {
        debug!(peer = %peer, "Relay shutting down, dropping new consumer");
        return;
    }

    let (sink, mut stream) = socket.split();
    let id = state.registry.next_id();
    let conn = Arc::new(ConsumerConnection::new(id, Some(peer), WsSink::new(sink)));
    if !state.registry.add(Arc::clone(&conn)).await {
        conn.close(state.write_timeout).await;
        return;
    }
    state.stats.record_accept();
    info!(connection_id = %id, peer = %peer, "Consumer attached");

    let reason = read_until_detached(&mut stream, &state.shutdown, conn.close_token()).await;
    drop(stream);

    if let Some(conn) = state.registry.remove(id).await {
        conn.close(state.write_timeout).await;
    }
    info!(
        connection_id = %id,
        peer = %peer,
        reason = %reason,
        connected_for = ?conn.connected_for(),
        "Consumer detached"
    );
}

/// Drain inbound frames, ignoring their content, until the consumer goes
/// away, the connection is closed from our side (`closed`) or `shutdown`
/// fires.
pub async fn read_until_detached<S, E>(
    stream: &mut S,
    shutdown: &CancellationToken,
    closed: &CancellationToken,
) -> DetachReason
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return DetachReason::Shutdown,
            () = closed.cancelled() => return DetachReason::Evicted,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(WsMessage::Close(_))) => return DetachReason::PeerClosed,
            Some(Ok(_)) => {}
            Some(Err(e)) => return DetachReason::ReadError(e.to_string()),
            None => return DetachReason::StreamEnded,
        }
    }
}
