//! ws-tunnel library crate.
//!
//! This crate accepts plain TCP connections on a local address and tunnels
//! each one over its own WebSocket connection to a fixed upstream endpoint,
//! relaying raw bytes in both directions until either side closes or the
//! process is asked to stop.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! TCP client (raw bytes)
//!         ↕
//! [ws-tunnel]
//!   ├── domain/           Pure types: TunnelConfig, TerminationSignal
//!   ├── application/      The two byte pumps (TCP → WS, WS → TCP)
//!   └── infrastructure/
//!         ├── listener/   TCP accept loop, one Bridge per client
//!         ├── bridge/     Per-client session orchestration and teardown
//!         └── upstream/   WebSocket dial (tokio-tungstenite)
//!         ↕
//! Upstream WebSocket endpoint (binary messages)
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O; it only uses synchronisation and URI parsing
//!   primitives.
//! - `application` is generic over `AsyncRead`/`AsyncWrite` and
//!   `Stream`/`Sink`, so the pumps can be tested without a network.
//! - `infrastructure` owns the sockets and spawns the Tokio tasks.

/// Domain layer: configuration and the per-session termination signal.
pub mod domain;

/// Application layer: unidirectional byte pumps.
pub mod application;

/// Infrastructure layer: listener, bridge and upstream dialer.
pub mod infrastructure;
