//! ws-tunnel — entry point.
//!
//! This binary listens on a local TCP address and tunnels every accepted
//! connection over its own WebSocket connection to a fixed upstream URL.
//! Bytes from the client go upstream as binary messages; message payloads
//! from the upstream go back to the client as raw bytes.
//!
//! # Usage
//!
//! ```text
//! ws-tunnel --upstream <URL> [OPTIONS]
//!
//! Options:
//!   --listen          <ADDR>  Local TCP listen address [default: 127.0.0.1:2020]
//!   --upstream        <URL>   Upstream WebSocket URL (ws:// or wss://)
//!   --buffer-size     <BYTES> Maximum bytes per upstream message [default: 1024]
//!   --connect-timeout <SECS>  Upstream connect + handshake timeout [default: 45]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable                 | Default          | Description                     |
//! |--------------------------|------------------|---------------------------------|
//! | `TUNNEL_LISTEN`          | `127.0.0.1:2020` | Local TCP listen address        |
//! | `TUNNEL_UPSTREAM`        | (required)       | Upstream WebSocket URL          |
//! | `TUNNEL_BUFFER_SIZE`     | `1024`           | Maximum bytes per message       |
//! | `TUNNEL_CONNECT_TIMEOUT` | `45`             | Connect timeout (secs)          |
//!
//! The log level is controlled by `RUST_LOG` (default `info`).
//!
//! # Shutdown
//!
//! Ctrl+C (and SIGTERM on Unix) stops the accept loop and ends every active
//! session; the process exits once all sessions have closed both connections.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ws_tunnel::domain::TunnelConfig;
use ws_tunnel::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tunnel local TCP connections over a WebSocket upstream.
#[derive(Debug, Parser)]
#[command(
    name = "ws-tunnel",
    about = "Tunnels local TCP connections over a WebSocket upstream",
    version
)]
struct Cli {
    /// Local address to accept TCP clients on.
    #[arg(long, default_value = "127.0.0.1:2020", env = "TUNNEL_LISTEN")]
    listen: String,

    /// WebSocket URL every client session is tunneled through.
    #[arg(long, env = "TUNNEL_UPSTREAM")]
    upstream: String,

    /// Maximum number of client bytes sent per upstream message.
    #[arg(long, default_value_t = 1024, env = "TUNNEL_BUFFER_SIZE")]
    buffer_size: usize,

    /// Seconds allowed for connecting to the upstream (TCP, TLS and upgrade).
    #[arg(long, default_value_t = 45, env = "TUNNEL_CONNECT_TIMEOUT")]
    connect_timeout: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a validated [`TunnelConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--listen` is not a socket address or if the
    /// resulting configuration fails [`TunnelConfig::validate`].
    fn into_tunnel_config(self) -> anyhow::Result<TunnelConfig> {
        let listen_addr: SocketAddr = self
            .listen
            .parse()
            .with_context(|| format!("invalid listen address: '{}'", self.listen))?;

        let config = TunnelConfig {
            listen_addr,
            upstream_url: self.upstream,
            read_buffer_size: self.buffer_size,
            connect_timeout: Duration::from_secs(self.connect_timeout),
        };
        config.validate().context("invalid configuration")?;

        Ok(config)
    }
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// Resolves on the first Ctrl+C, or SIGTERM on Unix.
async fn termination_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C — initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM — initiating graceful shutdown"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // tokio-tungstenite's rustls backend needs a process-wide crypto provider
    // for wss:// upstreams.  An `Err` means one is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Cli::parse().into_tunnel_config()?;

    info!(
        "ws-tunnel starting — listen={}, upstream={}",
        config.listen_addr, config.upstream_url
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            termination_requested().await;
            shutdown.cancel();
        }
    });

    run_server(config, shutdown).await?;

    info!("ws-tunnel stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
