//! Per-client session: one TCP client paired with one upstream WebSocket.
//!
//! # Session lifecycle
//!
//! ```text
//! CONNECTING ──dial ok──▶ RELAYING ──signal / shutdown──▶ DRAINING ──both pumps joined──▶ CLOSED
//!     │                                                                                     ▲
//!     └────────────────────────────── dial failed ──────────────────────────────────────────┘
//! ```
//!
//! - **CONNECTING**: the upstream is dialed once.  On failure the client socket
//!   is shut down and the session ends without relaying anything.
//! - **RELAYING**: two pump tasks run concurrently, one per direction, sharing
//!   a single [`TerminationSignal`].
//! - **DRAINING**: the signal has fired (a pump stopped, or the process-wide
//!   shutdown token was cancelled).  The bridge joins both pump tasks before
//!   touching either connection again.  After a client EOF the upstream →
//!   client pump keeps delivering until the upstream closes; shutdown or the
//!   drain timeout interrupts it.
//! - **CLOSED**: the upstream is closed first (WebSocket close handshake), then
//!   the client socket.  Each connection is closed exactly once, by this task.
//!
//! Errors never leave the session: they are logged inside the session's
//! tracing span and summarised in the returned [`SessionReport`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::application::pump::{self, PumpExit};
use crate::domain::config::TunnelConfig;
use crate::domain::signal::{TerminationCause, TerminationSignal};
use crate::infrastructure::upstream::{UpstreamConnection, UpstreamStream};

/// Upper bound on the WebSocket close handshake during teardown.
const UPSTREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the upstream may keep sending after the client's EOF before the
/// session is interrupted.
const CLIENT_EOF_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

type UpstreamSink = SplitSink<UpstreamStream, WsMessage>;
type UpstreamSource = SplitStream<UpstreamStream>;

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// Identifier carried by every log line of the session.
    pub session_id: Uuid,
    /// `false` when the upstream dial failed and nothing was relayed.
    pub relayed: bool,
    /// What ended the relay, recorded by the first party to fire the signal.
    /// `None` when the session never reached RELAYING.
    pub cause: Option<TerminationCause>,
}

/// Orchestrates sessions.  One `Bridge` is shared by every client; each call
/// to [`Bridge::run`] is an independent session.
#[derive(Debug, Clone)]
pub struct Bridge {
    config: Arc<TunnelConfig>,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Creates a bridge that dials `config.upstream_url` for every session and
    /// ends all sessions when `shutdown` is cancelled.
    pub fn new(config: Arc<TunnelConfig>, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Runs one session to completion.
    ///
    /// Returns once both connections are closed.  Never fails: every error is
    /// logged and reflected in the [`SessionReport`].
    pub async fn run(&self, client: TcpStream, peer: SocketAddr) -> SessionReport {
        let session_id = Uuid::new_v4();
        let span = info_span!("session", id = %session_id, %peer);
        self.run_session(client, session_id).instrument(span).await
    }

    async fn run_session(&self, client: TcpStream, session_id: Uuid) -> SessionReport {
        // ── CONNECTING ────────────────────────────────────────────────────────
        let url = &self.config.upstream_url;
        let upstream = match UpstreamConnection::connect(url, self.config.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                error!("error connecting to upstream {url}: {e}");
                close_client_stream(client).await;
                return SessionReport {
                    session_id,
                    relayed: false,
                    cause: None,
                };
            }
        };

        info!("connected to upstream {url}");

        // ── RELAYING ──────────────────────────────────────────────────────────
        let signal = TerminationSignal::new();
        let (mut client_rd, mut client_wr) = client.into_split();
        let (mut ws_tx, mut ws_rx) = upstream.into_inner().split();
        let buffer_size = self.config.read_buffer_size;

        let outbound = tokio::spawn({
            let signal = signal.clone();
            async move {
                let _guard = signal.fire_on_drop(TerminationCause::TaskFailed);
                let exit =
                    pump::client_to_upstream(&mut client_rd, &mut ws_tx, &signal, buffer_size)
                        .await;
                (exit, client_rd, ws_tx)
            }
            .in_current_span()
        });

        let inbound = tokio::spawn({
            let signal = signal.clone();
            async move {
                let _guard = signal.fire_on_drop(TerminationCause::TaskFailed);
                let exit = pump::upstream_to_client(&mut ws_rx, &mut client_wr, &signal).await;
                (exit, ws_rx, client_wr)
            }
            .in_current_span()
        });

        tokio::select! {
            _ = signal.fired() => {}
            _ = self.shutdown.cancelled() => {
                if signal.fire(TerminationCause::Shutdown) {
                    info!("shutdown requested; closing session");
                }
            }
        }

        // ── DRAINING ──────────────────────────────────────────────────────────
        let pumps = async move { tokio::join!(outbound, inbound) };
        tokio::pin!(pumps);
        let (outbound, inbound) = tokio::select! {
            biased;
            joined = &mut pumps => joined,
            _ = self.drain_cut_short(), if !signal.is_interrupted() => {
                signal.interrupt();
                pumps.await
            }
        };
        let (client_rd, ws_tx) = match outbound {
            Ok((exit, rd, tx)) => {
                log_exit("client → upstream", &exit);
                (Some(rd), Some(tx))
            }
            Err(e) => {
                log_join_error("client → upstream", &e);
                (None, None)
            }
        };
        let (ws_rx, client_wr) = match inbound {
            Ok((exit, rx, wr)) => {
                log_exit("upstream → client", &exit);
                (Some(rx), Some(wr))
            }
            Err(e) => {
                log_join_error("upstream → client", &e);
                (None, None)
            }
        };

        // ── CLOSED ────────────────────────────────────────────────────────────
        // Upstream first, then the client.  Halves lost to a panicked pump
        // were already dropped (and so closed) with that task.
        if let (Some(tx), Some(rx)) = (ws_tx, ws_rx) {
            close_upstream(tx, rx).await;
        }
        if let (Some(rd), Some(wr)) = (client_rd, client_wr) {
            close_client(rd, wr).await;
        }

        let cause = signal.cause();
        match cause {
            Some(cause) => info!("connection closed ({cause})"),
            None => info!("connection closed"),
        }

        SessionReport {
            session_id,
            relayed: true,
            cause,
        }
    }

    /// Resolves when a draining session must stop waiting for its pumps.
    async fn drain_cut_short(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("shutdown requested; closing session");
            }
            _ = tokio::time::sleep(CLIENT_EOF_DRAIN_TIMEOUT) => {
                info!("upstream still open {CLIENT_EOF_DRAIN_TIMEOUT:?} after client EOF; closing session");
            }
        }
    }
}

// ── Teardown helpers ──────────────────────────────────────────────────────────

fn log_exit(direction: &str, exit: &PumpExit) {
    match exit {
        PumpExit::Eof => debug!("{direction} pump reached end of stream"),
        PumpExit::Cancelled => debug!("{direction} pump stopped by termination signal"),
        PumpExit::Failed(e) => debug!("{direction} pump failed: {e}"),
    }
}

fn log_join_error(direction: &str, err: &JoinError) {
    error!("{direction} pump task did not complete: {err}");
}

async fn close_upstream(tx: UpstreamSink, rx: UpstreamSource) {
    let mut ws = match rx.reunite(tx) {
        Ok(ws) => ws,
        Err(e) => {
            debug!("could not reunite upstream halves: {e}");
            return;
        }
    };

    match timeout(UPSTREAM_CLOSE_TIMEOUT, ws.close(None)).await {
        Ok(Ok(())) => debug!("upstream closed"),
        // Already closed by the peer, or the socket is gone: nothing to do.
        Ok(Err(e)) => debug!("upstream close: {e}"),
        Err(_) => debug!("upstream close handshake timed out"),
    }
}

async fn close_client(rd: OwnedReadHalf, wr: OwnedWriteHalf) {
    match rd.reunite(wr) {
        Ok(stream) => close_client_stream(stream).await,
        Err(e) => debug!("could not reunite client halves: {e}"),
    }
}

async fn close_client_stream(mut stream: TcpStream) {
    if let Err(e) = stream.shutdown().await {
        debug!("client shutdown: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Returns a connected `(client, server_side)` TCP pair on loopback.
    async fn tcp_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (client, server_side, peer)
    }

    /// Spawns a one-shot upstream that echoes every data message back.
    async fn echo_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_binary() || msg.is_text() {
                    if ws.send(WsMessage::Binary(msg.into_data())).await.is_err() {
                        break;
                    }
                }
            }
        });
        format!("ws://{addr}/")
    }

    async fn read_to_close(client: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match client.read(&mut buf).await {
                Ok(0) | Err(_) => return received,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    }

    fn bridge_for(url: String) -> (Bridge, CancellationToken) {
        let shutdown = CancellationToken::new();
        let config = TunnelConfig {
            upstream_url: url,
            connect_timeout: Duration::from_secs(5),
            ..TunnelConfig::default()
        };
        (Bridge::new(Arc::new(config), shutdown.clone()), shutdown)
    }

    #[tokio::test]
    async fn test_client_eof_ends_session_with_client_eof_cause() {
        // Arrange
        let (bridge, _shutdown) = bridge_for(echo_upstream().await);
        let (mut client, server_side, peer) = tcp_pair().await;
        let session = tokio::spawn(async move { bridge.run(server_side, peer).await });

        // Act: close the write side straight after sending
        client.write_all(b"PING").await.unwrap();
        client.shutdown().await.unwrap();
        let echoed = timeout(Duration::from_secs(5), read_to_close(&mut client))
            .await
            .expect("client must be closed");

        // Assert: the echo still arrived after the EOF
        let report = timeout(Duration::from_secs(5), session)
            .await
            .expect("session must end")
            .unwrap();
        assert_eq!(echoed, b"PING");
        assert!(report.relayed);
        assert_eq!(report.cause, Some(TerminationCause::ClientEof));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_session_draining_after_client_eof() {
        // Arrange: an upstream that completes the handshake, then never reads
        // again, so it never answers the close frame
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            std::future::pending::<()>().await;
        });
        let (bridge, shutdown) = bridge_for(url);
        let (mut client, server_side, peer) = tcp_pair().await;
        let session = tokio::spawn(async move { bridge.run(server_side, peer).await });
        client.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.is_finished(), "session must wait for the upstream");

        // Act
        shutdown.cancel();

        // Assert: the recorded cause is still the client's EOF
        let report = timeout(Duration::from_secs(10), session)
            .await
            .expect("shutdown must end a draining session")
            .unwrap();
        assert_eq!(report.cause, Some(TerminationCause::ClientEof));
    }

    #[tokio::test]
    async fn test_dial_failure_closes_client_without_relaying() {
        // Arrange: nothing listens on the upstream port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);
        let (bridge, _shutdown) = bridge_for(url);
        let (mut client, server_side, peer) = tcp_pair().await;

        // Act
        let report = bridge.run(server_side, peer).await;

        // Assert: the client sees the connection end
        assert!(!report.relayed);
        assert_eq!(report.cause, None);
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("client must observe close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_shutdown_token_ends_healthy_session() {
        // Arrange
        let (bridge, shutdown) = bridge_for(echo_upstream().await);
        let (mut client, server_side, peer) = tcp_pair().await;
        let session = tokio::spawn(async move { bridge.run(server_side, peer).await });
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();

        // Act
        shutdown.cancel();

        // Assert
        let report = timeout(Duration::from_secs(5), session)
            .await
            .expect("session must end on shutdown")
            .unwrap();
        assert_eq!(report.cause, Some(TerminationCause::Shutdown));
    }
}
