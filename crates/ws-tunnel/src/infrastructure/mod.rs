//! Infrastructure layer for ws-tunnel.
//!
//! The infrastructure layer handles all I/O: accepting TCP clients, dialing
//! the upstream WebSocket and tearing both down when a session ends.
//!
//! # Responsibilities
//!
//! - Binding the local TCP listener
//! - Opening one upstream WebSocket connection per accepted client
//! - Spawning the per-session task and its two pump tasks
//! - Closing the upstream and then the client exactly once per session
//! - Draining active sessions on the process-wide shutdown token
//!
//! # What does NOT belong here?
//!
//! - The relay loops themselves (that is the application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod bridge;
pub mod listener;
pub mod upstream;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use bridge::{Bridge, SessionReport};
pub use listener::{run_server, serve};
pub use upstream::{DialError, UpstreamConnection};
