//! # Frame Dispatcher
//!
//! Turns inbound transport frames into state changes and replies. It is the
//! synchronous half of the receive loop: the connection task hands it one
//! frame at a time and sends whatever replies come back before reading the
//! next frame.
//!
//! ## Dispatch rules
//!
//! - Empty record or `{}`: handshake acknowledgement, nothing to do.
//! - `DATA` (1): the first argument replaces the published snapshot. Without
//!   arguments, or with a null first argument, the current state is kept and
//!   a warning is recorded.
//! - `PING` (6): exactly one pong is queued for the same connection.
//! - Any other kind: logged and skipped.
//! - Anything that does not decode: recorded as an error, the loop goes on.

use std::sync::Arc;

use crate::core::diagnostics::DiagnosticSink;
use crate::core::publisher::StatePublisher;
use crate::protocol::envelope::{self, Envelope, MessageKind, Record};
use crate::protocol::timing::TimingSnapshot;

/// A frame the connection must send back before reading on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Pong,
}

impl Reply {
    /// Wire text of the reply, record separator included.
    pub fn encode(self) -> String {
        match self {
            Reply::Pong => envelope::encode_pong(),
        }
    }
}

/// What a single record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    HandshakeAck,
    /// A new snapshot was published for this session.
    Published { session_name: String, entries: usize },
    /// `DATA` without a payload; state untouched.
    MissingPayload,
    Reply(Reply),
    /// Recognised envelope of a kind this client does not act on.
    Ignored(i64),
    /// The record could not be decoded; state untouched.
    Rejected,
}

/// Applies inbound records to the publisher. One instance per connection task.
pub struct FrameDispatcher {
    publisher: Arc<StatePublisher>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl FrameDispatcher {
    pub fn new(publisher: Arc<StatePublisher>, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            publisher,
            diagnostics,
        }
    }

    /// Handles one transport frame and returns the replies it requires, in
    /// order.
    pub fn handle_frame(&self, frame: &str) -> Vec<Reply> {
        self.diagnostics.record_raw(frame);

        envelope::split_records(frame)
            .into_iter()
            .filter_map(|record| match self.dispatch_record(record) {
                Outcome::Reply(reply) => Some(reply),
                _ => None,
            })
            .collect()
    }

    /// Handles one cleaned record.
    pub fn dispatch_record(&self, record: &str) -> Outcome {
        match envelope::classify(record) {
            Ok(Record::HandshakeAck) => {
                log::debug!("Handshake acknowledged by server.");
                Outcome::HandshakeAck
            }
            Ok(Record::Envelope(env)) => self.dispatch_envelope(env, record),
            Err(e) => {
                self.diagnostics.record_error("decode", &e);
                Outcome::Rejected
            }
        }
    }

    fn dispatch_envelope(&self, env: Envelope, record: &str) -> Outcome {
        match env.kind {
            MessageKind::Data => self.apply_data(&env, record),
            MessageKind::Ping => {
                log::trace!("Ping received, replying with pong.");
                Outcome::Reply(Reply::Pong)
            }
            MessageKind::Other(tag) => {
                log::debug!(
                    "Unrecognized message type {} (target: {:?}); skipping.",
                    tag,
                    env.target
                );
                Outcome::Ignored(tag)
            }
        }
    }

    fn apply_data(&self, env: &Envelope, record: &str) -> Outcome {
        let Some(payload) = env.first_argument().filter(|p| !p.is_null()) else {
            self.diagnostics
                .record_warning("dispatch", "data message without arguments; keeping current state");
            return Outcome::MissingPayload;
        };

        match TimingSnapshot::from_payload(payload) {
            Ok(snapshot) => {
                let session_name = snapshot.session_name.clone();
                let entries = snapshot.entries.len();
                log::debug!("Publishing snapshot for '{}' with {} entries.", session_name, entries);
                self.publisher.publish(snapshot, record);
                Outcome::Published {
                    session_name,
                    entries,
                }
            }
            Err(e) => {
                self.diagnostics.record_error("decode", &e);
                Outcome::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::DiagnosticLog;
    use serde_json::json;

    fn setup() -> (FrameDispatcher, Arc<StatePublisher>, Arc<DiagnosticLog>) {
        let publisher = Arc::new(StatePublisher::new());
        let diagnostics = Arc::new(DiagnosticLog::default());
        let dispatcher = FrameDispatcher::new(publisher.clone(), diagnostics.clone());
        (dispatcher, publisher, diagnostics)
    }

    fn data_frame(race: &str, drivers: serde_json::Value) -> String {
        let body = json!({
            "type": 1,
            "target": "timing",
            "arguments": [{"selectedSessionId": 1, "raceName": race, "drivers": drivers}]
        });
        format!("{}\u{1e}", body)
    }

    #[test]
    fn handshake_ack_changes_nothing() {
        let (dispatcher, publisher, diagnostics) = setup();
        assert!(dispatcher.handle_frame("{}\u{1e}").is_empty());
        assert!(dispatcher.handle_frame("").is_empty());
        assert_eq!(publisher.latest_snapshot(), None);
        assert_eq!(diagnostics.error_count(), 0);
    }

    #[test]
    fn data_publishes_snapshot_and_raw_record() {
        let (dispatcher, publisher, _) = setup();
        let frame = data_frame("Monza", json!([{"position": "1", "firstName": "Max", "lastName": "Verstappen"}]));

        assert!(dispatcher.handle_frame(&frame).is_empty());

        assert_eq!(publisher.session_name(), "Monza");
        let entries = publisher.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].first_name.as_deref(), Some("Max"));
        assert_eq!(publisher.raw_last_message(), frame.trim_end_matches('\u{1e}'));
    }

    #[test]
    fn latest_data_wins() {
        let (dispatcher, publisher, _) = setup();
        dispatcher.handle_frame(&data_frame("Monza", json!([{"position": "1"}, {"position": "2"}])));
        dispatcher.handle_frame(&data_frame("Imola", json!([{"position": "1"}])));

        assert_eq!(publisher.session_name(), "Imola");
        assert_eq!(publisher.entries().len(), 1);
    }

    #[test]
    fn data_without_arguments_keeps_state() {
        let (dispatcher, publisher, diagnostics) = setup();
        dispatcher.handle_frame(&data_frame("Monza", json!([])));

        assert_eq!(dispatcher.dispatch_record("{\"type\":1}"), Outcome::MissingPayload);
        assert_eq!(dispatcher.dispatch_record("{\"type\":1,\"arguments\":[]}"), Outcome::MissingPayload);
        assert_eq!(dispatcher.dispatch_record("{\"type\":1,\"arguments\":[null]}"), Outcome::MissingPayload);
        assert_eq!(publisher.session_name(), "Monza");
        assert_eq!(diagnostics.warning_count(), 3);
        assert_eq!(diagnostics.error_count(), 0);
    }

    #[test]
    fn ping_yields_exactly_one_pong_and_no_state_change() {
        let (dispatcher, publisher, _) = setup();
        dispatcher.handle_frame(&data_frame("Monza", json!([])));
        let before = publisher.latest_snapshot();

        let replies = dispatcher.handle_frame("{\"type\":6}\u{1e}");
        assert_eq!(replies, vec![Reply::Pong]);
        assert_eq!(replies[0].encode(), "{\"type\":6}\u{1e}");
        assert_eq!(publisher.latest_snapshot(), before);
    }

    #[test]
    fn malformed_frame_is_recorded_and_previous_snapshot_survives() {
        let (dispatcher, publisher, diagnostics) = setup();
        dispatcher.handle_frame(&data_frame("Monza", json!([{"position": "1"}])));

        assert!(dispatcher.handle_frame("not json").is_empty());
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.last_raw(), "not json");
        assert_eq!(publisher.session_name(), "Monza");

        dispatcher.handle_frame(&data_frame("Imola", json!([])));
        assert_eq!(publisher.session_name(), "Imola");
    }

    #[test]
    fn undecodable_payload_is_rejected() {
        let (dispatcher, publisher, diagnostics) = setup();
        let outcome = dispatcher.dispatch_record("{\"type\":1,\"arguments\":[\"Monza\"]}");
        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(publisher.latest_snapshot(), None);
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        let (dispatcher, publisher, diagnostics) = setup();
        assert_eq!(dispatcher.dispatch_record("{\"type\":7,\"error\":\"bye\"}"), Outcome::Ignored(7));
        assert_eq!(publisher.latest_snapshot(), None);
        assert_eq!(diagnostics.error_count(), 0);
    }

    #[test]
    fn batched_frame_is_processed_in_order() {
        let (dispatcher, publisher, _) = setup();
        let frame = format!(
            "{}{}{}",
            "{}\u{1e}",
            data_frame("Monza", json!([])),
            "{\"type\":6}\u{1e}"
        );
        assert_eq!(dispatcher.handle_frame(&frame), vec![Reply::Pong]);
        assert_eq!(publisher.session_name(), "Monza");
    }
}
