//! # Data Ingestors Module
//!
//! Clients that connect to an external source and feed the core engine.
//!
//! ## Contained Modules:
//! - **`timing_wss`**: The connection manager for the live timing WebSocket
//!   feed. Opens the socket, performs the handshake, runs the receive loop and
//!   closes it again on request. Connecting and disconnecting are idempotent.
//!
//! The client never reconnects on its own; retry policy belongs to the caller
//! (see the `servers` supervisor).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The WebSocket client for the live timing feed.
pub mod timing_wss;

// --- Public API Re-exports ---
pub use timing_wss::{FeedError, LifecycleState, LiveTimingClient};
