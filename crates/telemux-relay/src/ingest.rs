//! UDP datagram ingestion.
//!
//! Each received datagram becomes one dispatched message, byte for byte. The
//! receive buffer is one byte larger than `max_datagram_bytes` so that an
//! oversized datagram can be told apart from one that exactly fits; it is
//! then truncated to the limit and still forwarded.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::DispatchSender;
use crate::error::RelayError;
use crate::stats::RelayStats;

/// Receives telemetry datagrams and hands them to the dispatcher.
pub struct DatagramIngestor {
    socket: UdpSocket,
    max_datagram_bytes: usize,
    stats: Arc<RelayStats>,
}

impl DatagramIngestor {
    /// Bind the UDP listener. Failing to bind is fatal for the relay.
    pub async fn bind(
        addr: SocketAddr,
        max_datagram_bytes: usize,
        stats: Arc<RelayStats>,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| RelayError::Bind {
            listener: "UDP",
            addr,
            source,
        })?;
        Ok(Self::from_socket(socket, max_datagram_bytes, stats))
    }

    pub fn from_socket(socket: UdpSocket, max_datagram_bytes: usize, stats: Arc<RelayStats>) -> Self {
        Self {
            socket,
            max_datagram_bytes: max_datagram_bytes.max(1),
            stats,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until `cancel` fires or the broadcaster goes away.
    ///
    /// Receive errors are counted and skipped; they never stop the loop.
    pub async fn run(self, mut tx: DispatchSender, cancel: CancellationToken) {
        let limit = self.max_datagram_bytes;
        let mut buf = vec![0u8; limit + 1];
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, max_datagram_bytes = limit, "Datagram ingestor listening");
        }

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    self.stats.record_receive_error();
                    debug!(error = %e, "Datagram receive failed, skipping");
                    continue;
                }
            };

            let truncated = len > limit;
            if truncated {
                warn!(peer = %peer, limit, "Datagram exceeds size limit, truncating");
            }
            self.stats.record_datagram(truncated);
            let payload = Bytes::copy_from_slice(&buf[..len.min(limit)]);

            let sent = tokio::select! {
                () = cancel.cancelled() => break,
                sent = tx.send(payload) => sent,
            };
            match sent {
                Ok(sequence) => debug!(peer = %peer, sequence, bytes = len.min(limit), "Datagram dispatched"),
                Err(e) => {
                    info!(error = %e, "Dispatcher closed, ingestor stopping");
                    return;
                }
            }
        }
        info!("Datagram ingestor shutting down");
    }
}
