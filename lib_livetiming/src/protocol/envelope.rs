//! # Envelope Codec
//!
//! Decodes and encodes the JSON envelopes of the real-time messaging
//! sub-protocol. Every logical record on the wire is a JSON object terminated
//! by the record separator byte (`0x1E`), in both directions.
//!
//! Inbound records are classified by their integer `type` tag. Only `DATA` (1)
//! and `PING` (6) drive behaviour; everything else is kept as an opaque kind so
//! the dispatcher can log and skip it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminates every record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Sub-protocol name announced in the handshake.
pub const PROTOCOL_NAME: &str = "json";

/// Sub-protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised while turning a cleaned record into an [`Envelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON object (found {0})")]
    NotAnObject(&'static str),

    #[error("record has no integer `type` field")]
    MissingType,

    #[error("`arguments` must be an array (found {0})")]
    InvalidArguments(&'static str),

    #[error("data payload could not be decoded: {0}")]
    Payload(String),
}

/// Message kind carried in the envelope's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A push of business data (`type: 1`).
    Data,
    /// A server keepalive that must be answered with a pong (`type: 6`).
    Ping,
    /// Any other tag. Reserved by the protocol or unknown to this client.
    Other(i64),
}

impl MessageKind {
    pub const DATA_TAG: i64 = 1;
    pub const PING_TAG: i64 = 6;

    pub fn from_tag(tag: i64) -> Self {
        match tag {
            Self::DATA_TAG => MessageKind::Data,
            Self::PING_TAG => MessageKind::Ping,
            other => MessageKind::Other(other),
        }
    }

    pub fn tag(self) -> i64 {
        match self {
            MessageKind::Data => Self::DATA_TAG,
            MessageKind::Ping => Self::PING_TAG,
            MessageKind::Other(tag) => tag,
        }
    }
}

/// One decoded record. Transient: the dispatcher consumes it immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Topic name. Informational only, dispatch never depends on it.
    pub target: Option<String>,
    pub arguments: Option<Vec<Value>>,
}

impl Envelope {
    /// The first argument, which for `DATA` records is the timing payload.
    pub fn first_argument(&self) -> Option<&Value> {
        self.arguments.as_ref().and_then(|args| args.first())
    }
}

/// What a cleaned record turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Empty record or `{}`: the server accepted our handshake.
    HandshakeAck,
    Envelope(Envelope),
}

/// Splits one transport frame into its records.
///
/// Each record is trimmed of surrounding whitespace. A frame without any
/// separator is returned as a single record, so a frame holding exactly one
/// record behaves the same with or without its trailing `0x1E`. A frame made
/// only of separators and whitespace yields one empty record.
pub fn split_records(frame: &str) -> Vec<&str> {
    let records: Vec<&str> = frame
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect();

    if records.is_empty() {
        vec![""]
    } else {
        records
    }
}

/// Strips separators and surrounding whitespace from a single-record frame.
pub fn clean_frame(frame: &str) -> &str {
    frame.trim_matches(|c: char| c == RECORD_SEPARATOR || c.is_whitespace())
}

/// Classifies a cleaned record.
pub fn classify(cleaned: &str) -> Result<Record, DecodeError> {
    if is_handshake_ack(cleaned) {
        return Ok(Record::HandshakeAck);
    }
    decode(cleaned).map(Record::Envelope)
}

/// `true` for the empty record and the literal empty object.
pub fn is_handshake_ack(cleaned: &str) -> bool {
    let cleaned = clean_frame(cleaned);
    cleaned.is_empty() || cleaned == "{}"
}

/// Parses one cleaned record into an [`Envelope`].
pub fn decode(cleaned: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(cleaned)?;

    let object = match value {
        Value::Object(map) => map,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let tag = object
        .get("type")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::MissingType)?;

    let target = object
        .get("target")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let arguments = match object.get("arguments") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items.clone()),
        Some(other) => return Err(DecodeError::InvalidArguments(json_kind(other))),
    };

    Ok(Envelope {
        kind: MessageKind::from_tag(tag),
        target,
        arguments,
    })
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct PingMessage {
    #[serde(rename = "type")]
    kind: i64,
}

/// `{"protocol":"json","version":1}` followed by the record separator.
pub fn encode_handshake() -> String {
    let request = HandshakeRequest {
        protocol: PROTOCOL_NAME,
        version: PROTOCOL_VERSION,
    };
    // Serialising a struct of two plain fields cannot fail.
    let body = serde_json::to_string(&request).unwrap_or_default();
    terminate(body)
}

/// `{"type":6}` followed by the record separator.
pub fn encode_pong() -> String {
    let body = serde_json::to_string(&PingMessage {
        kind: MessageKind::PING_TAG,
    })
    .unwrap_or_default();
    terminate(body)
}

fn terminate(mut body: String) -> String {
    body.push(RECORD_SEPARATOR);
    body
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_frame_is_exact() {
        assert_eq!(encode_handshake(), "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn pong_frame_is_exact() {
        assert_eq!(encode_pong(), "{\"type\":6}\u{1e}");
    }

    #[test]
    fn clean_frame_strips_separator_and_whitespace() {
        assert_eq!(clean_frame("  {\"type\":6}\u{1e}\n"), "{\"type\":6}");
        assert_eq!(clean_frame("\u{1e}"), "");
    }

    #[test]
    fn handshake_ack_variants() {
        assert!(is_handshake_ack(""));
        assert!(is_handshake_ack("{}"));
        assert!(is_handshake_ack(" {}\u{1e} "));
        assert!(!is_handshake_ack("{\"type\":6}"));
        assert_eq!(classify("{}").unwrap(), Record::HandshakeAck);
    }

    #[test]
    fn split_records_handles_batched_frames() {
        let frame = "{}\u{1e}{\"type\":6}\u{1e}";
        assert_eq!(split_records(frame), vec!["{}", "{\"type\":6}"]);
        assert_eq!(split_records("\u{1e}  "), vec![""]);
        assert_eq!(split_records("{\"type\":1}"), vec!["{\"type\":1}"]);
    }

    #[test]
    fn decodes_data_envelope_with_target_and_arguments() {
        let raw = json!({
            "type": 1,
            "target": "timing",
            "arguments": [{"raceName": "Monza"}]
        })
        .to_string();

        let env = decode(&raw).unwrap();
        assert_eq!(env.kind, MessageKind::Data);
        assert_eq!(env.target.as_deref(), Some("timing"));
        assert_eq!(env.first_argument(), Some(&json!({"raceName": "Monza"})));
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let env = decode("{\"type\":3,\"invocationId\":\"1\"}").unwrap();
        assert_eq!(env.kind, MessageKind::Other(3));
        assert_eq!(env.kind.tag(), 3);
        assert!(env.arguments.is_none());
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject("array"))));
        assert!(matches!(decode("{\"target\":\"x\"}"), Err(DecodeError::MissingType)));
        assert!(matches!(decode("{\"type\":\"1\"}"), Err(DecodeError::MissingType)));
        assert!(matches!(
            decode("{\"type\":1,\"arguments\":{}}"),
            Err(DecodeError::InvalidArguments("object"))
        ));
    }
}
