//! # Diagnostic Sink
//!
//! Keeps the most recent raw frame and a short history of errors and warnings
//! for introspection. It is independent of the decoded snapshot: a frame that
//! fails to decode still shows up here.
//!
//! Recording must never disturb the receive loop. Implementations swallow
//! their own failures, and the default one recovers poisoned locks instead of
//! panicking.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One recorded problem.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEntry {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    /// Where it happened, e.g. `"decode"` or `"transport"`.
    pub context: String,
    pub message: String,
}

/// Observer of raw traffic and failures.
pub trait DiagnosticSink: Send + Sync {
    /// Called with every inbound frame before it is decoded.
    fn record_raw(&self, frame: &str);

    fn record_error(&self, context: &str, error: &dyn std::error::Error);

    /// Unexpected but harmless conditions, such as a `DATA` record without
    /// a payload.
    fn record_warning(&self, context: &str, message: &str);
}

#[derive(Default)]
struct DiagnosticState {
    last_raw: String,
    history: VecDeque<DiagnosticEntry>,
    error_count: u64,
    warning_count: u64,
}

/// In-memory sink that also forwards everything to the `log` facade.
pub struct DiagnosticLog {
    capacity: usize,
    state: Mutex<DiagnosticState>,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DiagnosticLog::DEFAULT_CAPACITY)
    }
}

impl DiagnosticLog {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a sink keeping at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(DiagnosticState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, severity: Severity, context: &str, message: String) {
        let mut state = self.lock();
        match severity {
            Severity::Error => state.error_count += 1,
            Severity::Warning => state.warning_count += 1,
        }
        if state.history.len() == self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(DiagnosticEntry {
            at: Utc::now(),
            severity,
            context: context.to_string(),
            message,
        });
    }

    /// The most recent inbound frame, exactly as received.
    pub fn last_raw(&self) -> String {
        self.lock().last_raw.clone()
    }

    pub fn last_error(&self) -> Option<DiagnosticEntry> {
        self.lock()
            .history
            .iter()
            .rev()
            .find(|e| e.severity == Severity::Error)
            .cloned()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<DiagnosticEntry> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn error_count(&self) -> u64 {
        self.lock().error_count
    }

    pub fn warning_count(&self) -> u64 {
        self.lock().warning_count
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn record_raw(&self, frame: &str) {
        log::trace!("Inbound frame: {}", frame);
        let mut state = self.lock();
        state.last_raw.clear();
        state.last_raw.push_str(frame);
    }

    fn record_error(&self, context: &str, error: &dyn std::error::Error) {
        log::error!("[{}] {}", context, error);
        self.push(Severity::Error, context, error.to_string());
    }

    fn record_warning(&self, context: &str, message: &str) {
        log::warn!("[{}] {}", context, message);
        self.push(Severity::Warning, context, message.to_string());
    }
}
