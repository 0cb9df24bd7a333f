//! One-shot termination signal shared by a session's pumps.
//!
//! Each session owns exactly one [`TerminationSignal`].  Both pumps hold a
//! clone and fire it when they stop; the bridge waits on it to know when to
//! start teardown.  The signal moves from *pending* to *fired* exactly once:
//! whichever `fire` call gets there first records its [`TerminationCause`],
//! every later call is a no-op.
//!
//! Firing is advisory.  It wakes everything waiting in [`TerminationSignal::fired`]
//! but does not abort any I/O on its own.  A second, separate event,
//! *interrupted*, is what the pumps race their reads and writes against.  It
//! is raised by every cause except [`TerminationCause::ClientEof`]: a client
//! that only closed its write side still reads, so the upstream → client pump
//! keeps delivering until the upstream closes.  The bridge raises it
//! explicitly with [`TerminationSignal::interrupt`] when draining has to be
//! cut short.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a session ended.  Recorded once, by the first party to fire the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The client closed its write side.
    ClientEof,
    /// Reading from or writing to the client failed.
    ClientError,
    /// The upstream closed the WebSocket with an expected close code, or the
    /// stream ended.
    UpstreamClosed,
    /// Reading from or writing to the upstream failed, or it closed with an
    /// unexpected code.
    UpstreamError,
    /// The process received an interrupt or termination request.
    Shutdown,
    /// A pump task ended without firing the signal itself (it panicked).
    TaskFailed,
}

impl TerminationCause {
    /// Returns `true` when this cause must stop both pumps at once.
    ///
    /// Only [`TerminationCause::ClientEof`] is a half-close: data still flows
    /// from the upstream to the client.
    pub fn interrupts_relay(self) -> bool {
        !matches!(self, TerminationCause::ClientEof)
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationCause::ClientEof => "client closed the connection",
            TerminationCause::ClientError => "client I/O error",
            TerminationCause::UpstreamClosed => "upstream closed the connection",
            TerminationCause::UpstreamError => "upstream I/O error",
            TerminationCause::Shutdown => "process shutdown",
            TerminationCause::TaskFailed => "pump task failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Default)]
struct Inner {
    cause: OnceLock<TerminationCause>,
    fired: CancellationToken,
    interrupted: CancellationToken,
}

/// Cloneable handle to a session's one-shot "stop now" event.
///
/// # Example
///
/// ```rust
/// use ws_tunnel::domain::{TerminationCause, TerminationSignal};
///
/// let signal = TerminationSignal::new();
/// assert!(signal.fire(TerminationCause::ClientEof));
/// assert!(!signal.fire(TerminationCause::UpstreamError));
/// assert_eq!(signal.cause(), Some(TerminationCause::ClientEof));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TerminationSignal {
    inner: Arc<Inner>,
}

impl TerminationSignal {
    /// Creates a signal in the pending state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal with `cause`.
    ///
    /// Returns `true` only for the call that moved the signal from pending to
    /// fired.  Safe to call concurrently from any number of tasks.  A winning
    /// cause that [interrupts the relay](TerminationCause::interrupts_relay)
    /// also raises the interrupt.
    pub fn fire(&self, cause: TerminationCause) -> bool {
        let won = self.inner.cause.set(cause).is_ok();
        if won {
            if cause.interrupts_relay() {
                self.inner.interrupted.cancel();
            }
            self.inner.fired.cancel();
        }
        won
    }

    /// Tells both pumps to stop now, whatever the recorded cause.
    pub fn interrupt(&self) {
        self.inner.interrupted.cancel();
    }

    /// Returns `true` once the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.inner.cause.get().is_some()
    }

    /// The cause recorded by the winning [`fire`](Self::fire), if any.
    pub fn cause(&self) -> Option<TerminationCause> {
        self.inner.cause.get().copied()
    }

    /// Waits until the signal has fired.  Resolves immediately if it already has.
    pub async fn fired(&self) {
        self.inner.fired.cancelled().await;
    }

    /// Returns `true` once the pumps have been told to stop.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.is_cancelled()
    }

    /// Waits until the pumps have been told to stop.
    pub async fn interrupted(&self) {
        self.inner.interrupted.cancelled().await;
    }

    /// Returns a guard that fires the signal with `cause` when dropped.
    ///
    /// Held by each pump task so that a panicking pump still releases the
    /// bridge.  When the pump has already fired the signal, the drop is a
    /// no-op.
    pub fn fire_on_drop(&self, cause: TerminationCause) -> FireOnDrop {
        FireOnDrop {
            signal: self.clone(),
            cause,
        }
    }
}

/// Guard returned by [`TerminationSignal::fire_on_drop`].
#[derive(Debug)]
pub struct FireOnDrop {
    signal: TerminationSignal,
    cause: TerminationCause,
}

impl Drop for FireOnDrop {
    fn drop(&mut self) {
        self.signal.fire(self.cause);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
