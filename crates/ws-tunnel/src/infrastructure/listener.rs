//! TCP accept loop.
//!
//! This module is responsible for:
//!
//! 1. Binding the local TCP listener on the configured address.
//! 2. Accepting client connections.
//! 3. Handing each connection to its own [`Bridge`] session task.
//! 4. On shutdown: no longer accepting, then waiting for every active
//!    session to finish its teardown.
//!
//! # Scalability
//!
//! Each client session runs in its own Tokio task (plus two pump tasks).  The
//! accept loop never waits on a session, so sessions are limited only by
//! available memory and file descriptors; no cap is applied.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::domain::config::TunnelConfig;
use crate::infrastructure::bridge::Bridge;

/// Binds `config.listen_addr` and serves clients until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, missing
/// permission, bad address).  This is the only process-fatal error: session
/// failures are contained in their own tasks.
pub async fn run_server(config: TunnelConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {}", config.listen_addr))?;

    info!("listening on {}", config.listen_addr);

    serve(listener, config, shutdown).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Returns after `shutdown` is cancelled and every session spawned by this
/// loop has closed both of its connections.
///
/// # Errors
///
/// Accept errors are logged and the loop continues, so this currently never
/// returns an error; the `Result` keeps the signature aligned with
/// [`run_server`].
pub async fn serve(
    listener: TcpListener,
    config: TunnelConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bridge = Arc::new(Bridge::new(Arc::new(config), shutdown.clone()));
    let sessions = TaskTracker::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested; no longer accepting connections");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("accepted connection from {peer}");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not set TCP_NODELAY for {peer}: {e}");
                }
                let bridge = Arc::clone(&bridge);
                sessions.spawn(async move {
                    bridge.run(stream, peer).await;
                });
            }
            Err(e) => {
                // Transient accept error (e.g., too many open file descriptors).
                // Log it and continue rather than stopping the listener.
                error!("error accepting connection: {e}");
            }
        }
    }

    sessions.close();
    if !sessions.is_empty() {
        info!("waiting for {} active session(s) to close", sessions.len());
    }
    sessions.wait().await;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // Arrange: occupy a port
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TunnelConfig {
            listen_addr: occupied.local_addr().unwrap(),
            ..TunnelConfig::default()
        };

        // Act
        let result = run_server(config, CancellationToken::new()).await;

        // Assert
        let err = result.expect_err("binding an occupied port must fail");
        assert!(err.to_string().contains("failed to bind TCP listener"));
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown_with_no_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, TunnelConfig::default(), shutdown.clone()));

        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("serve must return promptly")
            .unwrap();
        assert!(result.is_ok());
    }
}
