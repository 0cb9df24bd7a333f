//! Application layer for ws-tunnel.
//!
//! The application layer holds the relay logic: it knows *what* to move
//! between the two connections, but not *how* the connections were opened.
//!
//! # Responsibilities
//!
//! - Reading bounded chunks from the client and sending them upstream as
//!   binary WebSocket messages
//! - Writing every upstream message payload back to the client verbatim
//! - Classifying each way a pump can stop (EOF, expected close, failure)
//! - Firing the session's termination signal when a pump stops
//!
//! # What does NOT belong here?
//!
//! - Binding listeners or dialing the upstream (that is infrastructure)
//! - Tokio task spawning and teardown ordering (the bridge does that)

pub mod pump;

pub use pump::{
    client_to_upstream, is_expected_close, is_expected_close_code, upstream_to_client, PumpError,
    PumpExit,
};
