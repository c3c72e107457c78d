//! # lib_livetiming
//!
//! Ingestion of a real-time motorsport timing feed delivered over a
//! SignalR-core style JSON sub-protocol on a WebSocket.
//!
//! ```text
//! socket -> ingestors::timing_wss -> core::dispatcher -> core::publisher -> observers
//!                                          \-> core::diagnostics
//! ```
//!
//! Start with [`ingestors::LiveTimingClient`]; observe through
//! [`core::StatePublisher`].

#![forbid(unsafe_code)]

/// Feed endpoint and connection settings.
pub mod configs;
/// Publisher, diagnostics and frame dispatch.
pub mod core;
/// WebSocket connection manager.
pub mod ingestors;
/// Envelope codec and timing payload types.
pub mod protocol;
/// Driver and team lookups for display.
pub mod reference;

pub use configs::{FeedConfig, FeedConfigError};
pub use crate::core::{DiagnosticLog, DiagnosticSink, PublishedState, StatePublisher};
pub use ingestors::{FeedError, LifecycleState, LiveTimingClient};
pub use protocol::{DriverStatus, DriverTimingEntry, SectorHighlight, SessionId, TimingSnapshot};
pub use reference::{ColorHex, DriverInfo, ReferenceData, ReferenceTable};
