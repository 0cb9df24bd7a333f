//! The two unidirectional byte pumps of a session.
//!
//! ```text
//! client_to_upstream:  AsyncRead (client)  → bounded chunks → Binary messages → Sink (upstream)
//! upstream_to_client:  Stream (upstream)   → message payloads → write_all     → AsyncWrite (client)
//! ```
//!
//! Both pumps are generic over their I/O halves, so they run unchanged on the
//! split halves of a `TcpStream`/`WebSocketStream` and on in-memory fakes in
//! tests.
//!
//! Every pump fires the session's [`TerminationSignal`] on its way out and
//! returns a [`PumpExit`] describing how it stopped.  Every pending read and
//! write is raced against [`TerminationSignal::interrupted`], so a pump whose
//! peer is still healthy returns as soon as the session is interrupted.
//!
//! Client EOF is a half-close, not an interrupt: `client_to_upstream` passes
//! it on as a WebSocket close frame and returns, while `upstream_to_client`
//! keeps writing until the upstream answers with its own close.

use std::io;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::{
    error::ProtocolError,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Error as WsError, Message as WsMessage,
};
use tracing::{debug, warn};

use crate::domain::signal::{TerminationCause, TerminationSignal};

// ── Outcome types ─────────────────────────────────────────────────────────────

/// Abnormal ways a pump can stop.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("read from client failed: {0}")]
    ClientRead(#[source] io::Error),

    #[error("write to client failed: {0}")]
    ClientWrite(#[source] io::Error),

    #[error("read from upstream failed: {0}")]
    UpstreamRead(#[source] WsError),

    #[error("write to upstream failed: {0}")]
    UpstreamWrite(#[source] WsError),

    /// The upstream sent a close frame whose code is not one of the expected
    /// "going away" codes.
    #[error("upstream closed with code {code}: {reason}")]
    UpstreamClose { code: u16, reason: String },
}

/// How a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The source ended normally: client EOF, an expected WebSocket close, or
    /// the end of the upstream stream.
    Eof,
    /// The session was interrupted elsewhere; this pump stopped without its
    /// own I/O ending.
    Cancelled,
    /// The pump hit an abnormal I/O failure (already logged).
    Failed(PumpError),
}

impl PumpExit {
    /// Returns `true` for [`PumpExit::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, PumpExit::Failed(_))
    }
}

// ── Close classification ──────────────────────────────────────────────────────

/// Close codes that end a session quietly.
///
/// `Normal` (1000) is a clean close, `Away` (1001) is a server going down and
/// `Abnormal` (1006) is reported when the connection dropped without a close
/// frame.  Anything else is logged as an upstream failure.
pub fn is_expected_close_code(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away | CloseCode::Abnormal)
}

/// Read errors that just mean "the upstream is gone".
pub fn is_expected_close(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

// ── TCP → WebSocket ───────────────────────────────────────────────────────────

/// Forwards bytes read from the client to the upstream as binary messages.
///
/// Reads at most `buffer_size` bytes at a time and sends exactly the bytes
/// read as one [`WsMessage::Binary`].  Message boundaries carry no meaning;
/// only the concatenated byte order is preserved.
///
/// - Client EOF → fires [`TerminationCause::ClientEof`], sends a close frame
///   upstream, returns [`PumpExit::Eof`].
/// - Client read error → logged, fires [`TerminationCause::ClientError`].
/// - Upstream send error → logged, fires [`TerminationCause::UpstreamError`].
pub async fn client_to_upstream<R, S>(
    reader: &mut R,
    sink: &mut S,
    signal: &TerminationSignal,
    buffer_size: usize,
) -> PumpExit
where
    R: AsyncRead + Unpin,
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            _ = signal.interrupted() => return PumpExit::Cancelled,
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("client closed its write side (EOF)");
                signal.fire(TerminationCause::ClientEof);
                forward_eof(sink, signal).await;
                return PumpExit::Eof;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("error reading from client: {e}");
                signal.fire(TerminationCause::ClientError);
                return PumpExit::Failed(PumpError::ClientRead(e));
            }
        };

        let sent = tokio::select! {
            biased;
            _ = signal.interrupted() => return PumpExit::Cancelled,
            sent = sink.send(WsMessage::Binary(buf[..n].to_vec())) => sent,
        };

        if let Err(e) = sent {
            warn!("error writing to upstream: {e}");
            signal.fire(TerminationCause::UpstreamError);
            return PumpExit::Failed(PumpError::UpstreamWrite(e));
        }
    }
}

/// Starts the WebSocket close handshake so the upstream learns the client is
/// done sending.  Replies still in flight keep arriving until its close.
async fn forward_eof<S>(sink: &mut S, signal: &TerminationSignal)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let sent = tokio::select! {
        biased;
        _ = signal.interrupted() => return,
        sent = sink.send(WsMessage::Close(None)) => sent,
    };
    if let Err(e) = sent {
        debug!("could not forward client EOF upstream: {e}");
    }
}

// ── WebSocket → TCP ───────────────────────────────────────────────────────────

/// Writes every upstream message payload to the client, in arrival order.
///
/// Binary and text payloads are written verbatim.  Ping, pong and raw frames
/// carry nothing for the client and are skipped (tungstenite answers pings on
/// its own).
///
/// - Close frame with an expected code, an expected close error, or the end
///   of the stream → fires [`TerminationCause::UpstreamClosed`], not logged.
/// - Close frame with any other code, or any other read error → logged,
///   fires [`TerminationCause::UpstreamError`].
/// - Client write error → logged, fires [`TerminationCause::ClientError`].
pub async fn upstream_to_client<St, W>(
    stream: &mut St,
    writer: &mut W,
    signal: &TerminationSignal,
) -> PumpExit
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = signal.interrupted() => return PumpExit::Cancelled,
            next = stream.next() => next,
        };

        let payload = match next {
            Some(Ok(WsMessage::Binary(data))) => data,
            Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
            Some(Ok(WsMessage::Close(frame))) => return on_close_frame(frame, signal),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
            Some(Err(e)) if is_expected_close(&e) => {
                debug!("upstream connection closed: {e}");
                signal.fire(TerminationCause::UpstreamClosed);
                return PumpExit::Eof;
            }
            Some(Err(e)) => {
                warn!("error reading from upstream: {e}");
                signal.fire(TerminationCause::UpstreamError);
                return PumpExit::Failed(PumpError::UpstreamRead(e));
            }
            None => {
                debug!("upstream stream ended");
                signal.fire(TerminationCause::UpstreamClosed);
                return PumpExit::Eof;
            }
        };

        if payload.is_empty() {
            continue;
        }

        let written = tokio::select! {
            biased;
            _ = signal.interrupted() => return PumpExit::Cancelled,
            written = write_payload(writer, &payload) => written,
        };

        if let Err(e) = written {
            warn!("error writing to client: {e}");
            signal.fire(TerminationCause::ClientError);
            return PumpExit::Failed(PumpError::ClientWrite(e));
        }
    }
}

async fn write_payload<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await
}

fn on_close_frame(frame: Option<CloseFrame<'_>>, signal: &TerminationSignal) -> PumpExit {
    match frame {
        Some(frame) if !is_expected_close_code(frame.code) => {
            let code = u16::from(frame.code);
            warn!("upstream closed with unexpected code {code}: {}", frame.reason);
            signal.fire(TerminationCause::UpstreamError);
            PumpExit::Failed(PumpError::UpstreamClose {
                code,
                reason: frame.reason.into_owned(),
            })
        }
        _ => {
            debug!("upstream sent close frame");
            signal.fire(TerminationCause::UpstreamClosed);
            PumpExit::Eof
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
