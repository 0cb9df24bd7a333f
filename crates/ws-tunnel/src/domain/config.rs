//! Tunnel configuration types.
//!
//! [`TunnelConfig`] is the single source of truth for all runtime settings.
//! It is populated from CLI arguments in `main.rs` (or from defaults in tests)
//! and then shared read-only across every session through an `Arc`.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::http::Uri;

/// Errors found while validating a [`TunnelConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The upstream URL could not be parsed at all.
    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The upstream URL parsed but is not a WebSocket URL.
    #[error("unsupported upstream scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The upstream URL has no host to dial.
    #[error("upstream URL '{0}' has no host")]
    MissingHost(String),

    /// A zero-sized read buffer would make the client pump spin without reading.
    #[error("read buffer size must be greater than zero")]
    ZeroBufferSize,

    /// A zero connect timeout would fail every dial immediately.
    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,
}

/// All runtime configuration for the tunnel.
///
/// # Example
///
/// ```rust
/// use ws_tunnel::domain::TunnelConfig;
///
/// let cfg = TunnelConfig {
///     upstream_url: "wss://tunnel.example.com/".to_string(),
///     ..TunnelConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.listen_addr.port(), 2020);
/// ```
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Local address the TCP listener binds to.
    pub listen_addr: SocketAddr,

    /// WebSocket URL dialed once per accepted client (`ws://` or `wss://`).
    pub upstream_url: String,

    /// Upper bound on the bytes read from the client per upstream message.
    ///
    /// This is a throughput tunable only: the upstream sees the same byte
    /// stream whatever the chunking.
    pub read_buffer_size: usize,

    /// Maximum time allowed for the TCP connect, TLS and WebSocket handshake
    /// with the upstream.
    pub connect_timeout: Duration,
}

impl Default for TunnelConfig {
    /// | Field            | Default             |
    /// |------------------|---------------------|
    /// | listen_addr      | `127.0.0.1:2020`    |
    /// | upstream_url     | `wss://127.0.0.1/`  |
    /// | read_buffer_size | 1024 bytes          |
    /// | connect_timeout  | 45 seconds          |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 2020)),
            upstream_url: "wss://127.0.0.1/".to_string(),
            read_buffer_size: 1024,
            connect_timeout: Duration::from_secs(45),
        }
    }
}

impl TunnelConfig {
    /// Checks that the configuration can actually be served.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: an unparseable or non-WebSocket
    /// upstream URL, a URL without a host, a zero read buffer or a zero
    /// connect timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let uri: Uri = self
            .upstream_url
            .parse()
            .map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
                ConfigError::InvalidUrl {
                    url: self.upstream_url.clone(),
                    reason: e.to_string(),
                }
            })?;

        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            other => return Err(ConfigError::UnsupportedScheme(other.unwrap_or("").to_string())),
        }

        if uri.host().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingHost(self.upstream_url.clone()));
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }

        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
