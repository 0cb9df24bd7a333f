//! WebSocket connection to the upstream endpoint.
//!
//! Each accepted client gets its own upstream connection, dialed exactly once.
//! There is no pooling and no retry: if the dial fails, the session ends.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Error as WsError, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

/// The concrete WebSocket stream type produced by [`UpstreamConnection::connect`].
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the upstream could not be reached.
#[derive(Debug, Error)]
pub enum DialError {
    /// TCP connect, TLS and the WebSocket handshake did not finish in time.
    #[error("timed out after {0:?} connecting to upstream")]
    Timeout(Duration),

    /// The connection or the WebSocket handshake failed.
    #[error("upstream handshake failed: {0}")]
    Handshake(#[from] WsError),
}

/// An established WebSocket connection to the upstream.
pub struct UpstreamConnection {
    stream: UpstreamStream,
}

impl UpstreamConnection {
    /// Dials `url` once, bounded by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Timeout`] if the whole handshake takes longer than
    /// `connect_timeout`, or [`DialError::Handshake`] if the TCP connect, TLS
    /// negotiation or HTTP upgrade fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use ws_tunnel::infrastructure::UpstreamConnection;
    ///
    /// # async fn example() -> Result<(), ws_tunnel::infrastructure::DialError> {
    /// let _conn = UpstreamConnection::connect("wss://tunnel.example.com/", Duration::from_secs(45)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, DialError> {
        let (stream, response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| DialError::Timeout(connect_timeout))??;

        debug!("upstream handshake complete ({})", response.status());

        Ok(Self { stream })
    }

    /// Gives up the wrapper and returns the underlying WebSocket stream.
    pub fn into_inner(self) -> UpstreamStream {
        self.stream
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
