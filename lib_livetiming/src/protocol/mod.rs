//! # Wire Protocol Module
//!
//! Everything that knows the shape of bytes on the socket: the envelope codec
//! for the messaging sub-protocol and the timing payload it carries. Nothing
//! in here performs I/O.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Envelope framing, classification, handshake and pong encoding.
pub mod envelope;
/// Timing snapshot and driver entry decoded from `DATA` payloads.
pub mod timing;

pub use envelope::{DecodeError, Envelope, MessageKind, Record, RECORD_SEPARATOR};
pub use timing::{DriverStatus, DriverTimingEntry, SectorHighlight, SessionId, TimingSnapshot};
