//! # State Publisher
//!
//! Holds the latest published state of the feed and hands it to any number of
//! observers. Each field is its own `tokio::sync::watch` channel, so a reader
//! always sees the most recent value and never replays history.
//!
//! ## Single writer
//!
//! Only the connection's receive loop writes here (plus `reset`, which the
//! client runs after that loop has stopped). Writes use `send_replace`, which
//! never waits for receivers to catch up and succeeds even when nobody is
//! subscribed.
//!
//! ## Snapshot and session name
//!
//! The session name lives inside the `TimingSnapshot` and both are published as
//! one `Arc`. A reader can therefore never pair a snapshot with another
//! message's session name.

use std::sync::Arc;
use tokio::sync::watch;

use crate::protocol::timing::{DriverTimingEntry, TimingSnapshot};

/// A point-in-time copy of everything the publisher exposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedState {
    pub is_connected: bool,
    pub connection_error: Option<String>,
    pub latest_snapshot: Option<Arc<TimingSnapshot>>,
    pub raw_last_message: String,
}

impl PublishedState {
    /// Session name of the latest snapshot, or `""` when there is none.
    pub fn session_name(&self) -> &str {
        self.latest_snapshot
            .as_deref()
            .map(|s| s.session_name.as_str())
            .unwrap_or("")
    }
}

/// Owner of the observable state channels.
pub struct StatePublisher {
    connected: watch::Sender<bool>,
    connection_error: watch::Sender<Option<String>>,
    snapshot: watch::Sender<Option<Arc<TimingSnapshot>>>,
    raw_last_message: watch::Sender<String>,
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePublisher {
    /// Creates a publisher in the empty, disconnected state.
    pub fn new() -> Self {
        Self {
            connected: watch::Sender::new(false),
            connection_error: watch::Sender::new(None),
            snapshot: watch::Sender::new(None),
            raw_last_message: watch::Sender::new(String::new()),
        }
    }

    // --- Readers ---

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn connection_error(&self) -> Option<String> {
        self.connection_error.borrow().clone()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<TimingSnapshot>> {
        self.snapshot.borrow().clone()
    }

    /// Session name paired with the latest snapshot.
    pub fn session_name(&self) -> String {
        self.snapshot
            .borrow()
            .as_deref()
            .map(|s| s.session_name.clone())
            .unwrap_or_default()
    }

    /// Driver entries of the latest snapshot, in server order.
    pub fn entries(&self) -> Vec<DriverTimingEntry> {
        self.snapshot
            .borrow()
            .as_deref()
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    pub fn raw_last_message(&self) -> String {
        self.raw_last_message.borrow().clone()
    }

    /// Reads every field once. Fields are read one after another, so a
    /// concurrent write may land between them; the snapshot itself is always
    /// whole.
    pub fn state(&self) -> PublishedState {
        PublishedState {
            is_connected: self.is_connected(),
            connection_error: self.connection_error(),
            latest_snapshot: self.latest_snapshot(),
            raw_last_message: self.raw_last_message(),
        }
    }

    // --- Subscriptions ---

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn subscribe_connection_error(&self) -> watch::Receiver<Option<String>> {
        self.connection_error.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Arc<TimingSnapshot>>> {
        self.snapshot.subscribe()
    }

    pub fn subscribe_raw_last_message(&self) -> watch::Receiver<String> {
        self.raw_last_message.subscribe()
    }

    // --- Writer side ---

    /// The socket is open and the handshake went out.
    pub(crate) fn mark_connected(&self) {
        self.connection_error.send_replace(None);
        self.connected.send_replace(true);
    }

    /// The transport failed. The last good snapshot stays visible.
    /// The error is set first so anyone woken by `connected` can read it.
    pub(crate) fn mark_failed(&self, error: impl Into<String>) {
        self.connection_error.send_replace(Some(error.into()));
        self.connected.send_replace(false);
    }

    /// The server closed the connection cleanly. No error is recorded.
    pub(crate) fn mark_closed(&self) {
        self.connected.send_replace(false);
    }

    /// Replaces the snapshot (and with it the session name) and records the
    /// record that produced it.
    pub(crate) fn publish(&self, snapshot: TimingSnapshot, raw: &str) {
        self.snapshot.send_replace(Some(Arc::new(snapshot)));
        self.raw_last_message.send_replace(raw.to_string());
    }

    /// Back to the initial, empty state.
    pub(crate) fn reset(&self) {
        self.connected.send_replace(false);
        self.snapshot.send_replace(None);
        self.connection_error.send_replace(None);
        self.raw_last_message.send_replace(String::new());
    }
}
