//! telemux Relay Server
//!
//! Receives telemetry datagrams over UDP and fans each one out to every
//! attached WebSocket consumer.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use telemux_core::RelayConfig;
use telemux_core::config::load_config;
use telemux_core::tracing_init::init_tracing;
use telemux_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "telemux-relay")]
#[command(
    version,
    about = "telemux relay server - UDP telemetry ingestion and WebSocket fan-out"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "TELEMUX_CONFIG")]
    config: Option<PathBuf>,

    /// UDP address to receive datagrams on.
    #[arg(long)]
    udp_addr: Option<SocketAddr>,

    /// HTTP address for WebSocket consumers and the health endpoint.
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Path accepting WebSocket upgrades.
    #[arg(long)]
    ws_path: Option<String>,

    /// Largest datagram forwarded intact; longer ones are truncated.
    #[arg(long)]
    max_datagram_bytes: Option<usize>,

    /// Messages the dispatcher may buffer ahead of the broadcaster.
    #[arg(long)]
    dispatch_capacity: Option<usize>,

    /// Per-consumer write deadline in milliseconds.
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// CLI flags take precedence over the file and environment.
    fn apply(self, config: &mut RelayConfig) {
        if let Some(addr) = self.udp_addr {
            config.udp_addr = addr;
        }
        if let Some(addr) = self.http_addr {
            config.http_addr = addr;
        }
        if let Some(path) = self.ws_path {
            config.ws_path = path;
        }
        if let Some(max) = self.max_datagram_bytes {
            config.max_datagram_bytes = max;
        }
        if let Some(capacity) = self.dispatch_capacity {
            config.dispatch_capacity = capacity;
        }
        if let Some(ms) = self.write_timeout_ms {
            config.write_timeout_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("telemux_relay=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        udp_addr = %config.udp_addr,
        http_addr = %config.http_addr,
        "Starting telemux-relay"
    );

    let server = RelayServer::bind(config).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
        }
        signal_cancel.cancel();
    });

    server.run(cancel).await?;
    Ok(())
}
