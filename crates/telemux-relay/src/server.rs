//! Relay server: binds both listeners and wires the pipeline together.
//!
//! ```text
//! UDP ─► DatagramIngestor ─► dispatch (bounded FIFO) ─► Broadcaster ─► consumers
//!                                                            ▲
//! HTTP ─► axum router ─► ws_handler ─► ConnectionRegistry ───┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use telemux_core::RelayConfig;

use crate::broadcaster::Broadcaster;
use crate::dispatch;
use crate::error::RelayError;
use crate::ingest::DatagramIngestor;
use crate::registry::ConnectionRegistry;
use crate::routes::{AppState, build_router};
use crate::stats::RelayStats;

/// A relay with both listeners bound, ready to [`run`](Self::run).
pub struct RelayServer {
    config: RelayConfig,
    ingestor: DatagramIngestor,
    listener: TcpListener,
    udp_addr: SocketAddr,
    http_addr: SocketAddr,
    registry: ConnectionRegistry,
    stats: Arc<RelayStats>,
}

impl RelayServer {
    /// Validate `config` and bind the UDP and HTTP listeners.
    ///
    /// Binding happens here rather than in [`run`](Self::run) so that a port
    /// conflict surfaces before anything is spawned.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let stats = Arc::new(RelayStats::new());
        let ingestor = DatagramIngestor::bind(
            config.udp_addr,
            config.max_datagram_bytes,
            Arc::clone(&stats),
        )
        .await?;
        let udp_addr = ingestor.local_addr().map_err(|source| RelayError::Bind {
            listener: "UDP",
            addr: config.udp_addr,
            source,
        })?;

        let http_bind = |source: std::io::Error| RelayError::Bind {
            listener: "HTTP",
            addr: config.http_addr,
            source,
        };
        let listener = TcpListener::bind(config.http_addr).await.map_err(http_bind)?;
        let http_addr = listener.local_addr().map_err(http_bind)?;

        Ok(Self {
            config,
            ingestor,
            listener,
            udp_addr,
            http_addr,
            registry: ConnectionRegistry::new(),
            stats,
        })
    }

    /// Bound UDP address (resolves port 0).
    pub const fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Bound HTTP address (resolves port 0).
    pub const fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Serve until `cancel` fires.
    ///
    /// If the ingestor or broadcaster stops on its own, the whole relay shuts
    /// down with it. On return every remaining consumer has been closed.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        let Self {
            config,
            ingestor,
            listener,
            udp_addr,
            http_addr,
            registry,
            stats,
        } = self;
        let cancel = cancel.child_token();
        let write_timeout = config.write_timeout();

        let (tx, rx) = dispatch::channel(config.dispatch_capacity);

        let ingest_task = tokio::spawn({
            let guard = cancel.clone().drop_guard();
            let token = cancel.clone();
            async move {
                ingestor.run(tx, token).await;
                drop(guard);
            }
        });

        let broadcaster = Broadcaster::new(registry.clone(), Arc::clone(&stats), write_timeout);
        let broadcast_task = tokio::spawn({
            let guard = cancel.clone().drop_guard();
            let token = cancel.clone();
            async move {
                broadcaster.run(rx, token).await;
                drop(guard);
            }
        });

        let state = AppState {
            registry: registry.clone(),
            stats,
            write_timeout,
            shutdown: cancel.clone(),
        };
        let app = build_router(state, &config.ws_path);

        info!(
            udp = %udp_addr,
            http = %http_addr,
            ws_path = %config.ws_path,
            "Relay listening"
        );

        let shutdown = cancel.clone();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

        cancel.cancel();
        ingest_task.await?;
        broadcast_task.await?;

        let remaining = registry.drain().await;
        let closing = remaining.len();
        for conn in remaining {
            conn.close(write_timeout).await;
        }
        info!(closed = closing, "Relay stopped");

        served.map_err(RelayError::Serve)
    }
}
