//! # Core Engine Module
//!
//! The pieces that sit between the socket and the observers of the feed.
//!
//! ## Core Components:
//!
//! - **`publisher`**: Single-writer holder of the observable state
//!   (`is_connected`, `connection_error`, latest snapshot, raw last message).
//!   Readers subscribe through `watch` channels and always see the newest value.
//!
//! - **`diagnostics`**: The diagnostic sink. Records the raw inbound frame and a
//!   bounded history of decode and transport problems, independently of the
//!   decoded snapshot.
//!
//! - **`dispatcher`**: Applies one inbound frame: splits it into records,
//!   classifies each, publishes `DATA` payloads and queues pongs for pings.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Diagnostic sink trait and the in-memory default implementation.
pub mod diagnostics;
/// Frame-by-frame dispatch of inbound records.
pub mod dispatcher;
/// Observable state of the feed.
pub mod publisher;

// --- Public API Re-exports ---
pub use diagnostics::{DiagnosticEntry, DiagnosticLog, DiagnosticSink, Severity};
pub use dispatcher::{FrameDispatcher, Outcome, Reply};
pub use publisher::{PublishedState, StatePublisher};
