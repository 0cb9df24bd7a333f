//! Domain layer for ws-tunnel.
//!
//! The domain layer contains the types every other layer shares and that have
//! no dependency on sockets or the async runtime's I/O drivers.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures and their validation
//! - The one-shot termination signal shared by a session's two pumps
//!
//! # What does NOT belong here?
//!
//! - Any `TcpStream` or `WebSocketStream` types
//! - Environment variable or CLI parsing (done in `main.rs`)

pub mod config;
pub mod signal;

pub use config::{ConfigError, TunnelConfig};
pub use signal::{FireOnDrop, TerminationCause, TerminationSignal};
