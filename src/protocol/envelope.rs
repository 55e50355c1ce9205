//! Envelope wire codec
//!
//! Every WebSocket text frame carries exactly one envelope:
//! ```text
//! {"type":"<tag>","id":"<uuid>","timestamp":<epoch millis>,"payload":{...}}
//! ```
//!
//! Decoding happens in two passes. The fixed header fields are parsed with
//! serde. The payload is located separately by scanning the raw text, and
//! kept as the exact substring the server sent. It is only deserialized
//! when a consumer asks for it with a concrete type, because its shape
//! depends on the envelope `type`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{epoch_millis, Error, Result};

/// Known envelope type tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    // Inbound
    Connected,
    InitSession,
    ExecuteStep,
    ExecuteCommand,
    Abort,
    // Outbound
    SessionReady,
    StepResult,
    TestComplete,
    CommandResult,
    Heartbeat,
    /// Any tag outside the known set
    Unknown(String),
}

impl MessageType {
    /// Parse a wire tag; unknown tags are preserved rather than rejected
    pub fn parse(tag: &str) -> Self {
        match tag {
            "connected" => Self::Connected,
            "init_session" => Self::InitSession,
            "execute_step" => Self::ExecuteStep,
            "execute_command" => Self::ExecuteCommand,
            "abort" => Self::Abort,
            "session_ready" => Self::SessionReady,
            "step_result" => Self::StepResult,
            "test_complete" => Self::TestComplete,
            "command_result" => Self::CommandResult,
            "heartbeat" => Self::Heartbeat,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire tag for this type
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::InitSession => "init_session",
            Self::ExecuteStep => "execute_step",
            Self::ExecuteCommand => "execute_command",
            Self::Abort => "abort",
            Self::SessionReady => "session_ready",
            Self::StepResult => "step_result",
            Self::TestComplete => "test_complete",
            Self::CommandResult => "command_result",
            Self::Heartbeat => "heartbeat",
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded envelope with its payload still in raw form
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Type tag as received
    pub message_type: String,
    /// Sender-generated unique token
    pub id: String,
    /// Sender timestamp in epoch milliseconds
    pub timestamp: i64,
    /// Exact payload text, if the envelope had one
    raw_payload: Option<String>,
}

impl Envelope {
    /// Typed view of the `type` tag
    pub fn kind(&self) -> MessageType {
        MessageType::parse(&self.message_type)
    }

    /// The payload exactly as it appeared on the wire
    pub fn raw_payload(&self) -> Option<&str> {
        self.raw_payload.as_deref()
    }

    /// Deserialize the payload into the shape the caller expects
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.raw_payload.as_deref().ok_or_else(|| {
            Error::Protocol(format!("'{}' envelope has no payload", self.message_type))
        })?;
        serde_json::from_str(raw).map_err(|e| {
            Error::Protocol(format!("Invalid '{}' payload: {}", self.message_type, e))
        })
    }
}

/// Fixed header fields, parsed in the first pass
#[derive(Deserialize)]
struct EnvelopeHeader {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, P: Serialize + ?Sized> {
    #[serde(rename = "type")]
    message_type: &'a str,
    id: String,
    timestamp: i64,
    payload: &'a P,
}

/// Encode an outgoing envelope with a fresh id and the current time
pub fn encode<P: Serialize + ?Sized>(message_type: &str, payload: &P) -> Result<String> {
    let envelope = OutgoingEnvelope {
        message_type,
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: epoch_millis(),
        payload,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode an incoming envelope
pub fn decode(text: &str) -> Result<Envelope> {
    let header: EnvelopeHeader = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("Invalid envelope: {}", e)))?;
    let raw_payload = extract_payload(text)?.map(str::to_string);

    Ok(Envelope {
        message_type: header.message_type,
        id: header.id,
        timestamp: header.timestamp,
        raw_payload,
    })
}

/// Locate the raw text of the top-level `payload` value
///
/// Returns `Ok(None)` when the envelope has no payload key. Braces and
/// brackets inside string literals do not count toward nesting, and a
/// quote preceded by an odd run of backslashes does not end a string.
pub fn extract_payload(text: &str) -> Result<Option<&str>> {
    let bytes = text.as_bytes();
    let Some(key_end) = find_top_level_key(bytes, b"payload") else {
        return Ok(None);
    };

    let colon = skip_whitespace(bytes, key_end);
    let start = skip_whitespace(bytes, colon + 1);

    let end = match bytes.get(start) {
        Some(b'{') | Some(b'[') => scan_balanced(bytes, start)?,
        Some(b'"') => {
            string_end(bytes, start)
                .ok_or_else(|| Error::Protocol("Unterminated payload string".to_string()))?
                + 1
        }
        Some(_) => scan_scalar(bytes, start),
        None => return Err(Error::Protocol("Envelope ends before payload value".to_string())),
    };

    text.get(start..end)
        .map(|raw| Some(raw.trim_end()))
        .ok_or_else(|| Error::Protocol("Payload is not valid UTF-8".to_string()))
}

/// Find a key of the outermost object; returns the index just past its closing quote
fn find_top_level_key(bytes: &[u8], key: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let end = string_end(bytes, i)?;
                if depth == 1 && &bytes[i + 1..end] == key {
                    let after = skip_whitespace(bytes, end + 1);
                    if bytes.get(after) == Some(&b':') {
                        return Some(end + 1);
                    }
                }
                i = end;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }

    None
}

/// Scan a `{...}` or `[...]` value starting at `start`; returns the end index (exclusive)
fn scan_balanced(bytes: &[u8], start: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = string_end(bytes, i)
                    .ok_or_else(|| Error::Protocol("Unterminated string in payload".to_string()))?;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err(Error::Protocol("Unbalanced payload".to_string()))
}

/// Scan a bare scalar (number, bool, null) up to the next delimiter
fn scan_scalar(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| matches!(b, b',' | b'}' | b']'))
        .map_or(bytes.len(), |offset| start + offset)
}

/// Index of the quote closing the string opened at `open`
fn string_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut backslashes = 0usize;
    for (offset, b) in bytes.get(open + 1..)?.iter().enumerate() {
        match b {
            b'\\' => backslashes += 1,
            b'"' if backslashes % 2 == 0 => return Some(open + 1 + offset),
            _ => backslashes = 0,
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_payload_with_braces_in_string() {
        let text = r#"{"type":"execute_command","id":"1","timestamp":5,"payload":{"text":"a{b}c"}}"#;
        assert_eq!(extract_payload(text).unwrap(), Some(r#"{"text":"a{b}c"}"#));
    }

    #[test]
    fn test_payload_with_escaped_quotes() {
        let text = r#"{"type":"x","payload":{"text":"say \"}\" now","n":[1,{"a":"]"}]},"id":"2"}"#;
        assert_eq!(
            extract_payload(text).unwrap(),
            Some(r#"{"text":"say \"}\" now","n":[1,{"a":"]"}]}"#)
        );
    }

    #[test]
    fn test_even_backslash_run_closes_string() {
        // The string value is `c:\\` followed by a real closing quote.
        let text = r#"{"type":"x","payload":{"path":"c:\\\\","k":"}"},"id":"3"}"#;
        assert_eq!(
            extract_payload(text).unwrap(),
            Some(r#"{"path":"c:\\\\","k":"}"}"#)
        );
    }

    #[test]
    fn test_payload_key_inside_string_is_skipped() {
        let text = r#"{"id":"\"payload\": {","type":"x","payload":{"ok":true}}"#;
        assert_eq!(extract_payload(text).unwrap(), Some(r#"{"ok":true}"#));
    }

    #[test]
    fn test_nested_payload_key_is_not_top_level() {
        let text = r#"{"type":"x","meta":{"payload":{"wrong":1}},"payload":{"right":2}}"#;
        assert_eq!(extract_payload(text).unwrap(), Some(r#"{"right":2}"#));
    }

    #[test]
    fn test_whitespace_around_payload() {
        let text = "{\"type\":\"x\", \"payload\" :\n  [1, 2, 3] \n}";
        assert_eq!(extract_payload(text).unwrap(), Some("[1, 2, 3]"));
    }

    #[test]
    fn test_scalar_and_string_payloads() {
        let text = r#"{"type":"x","payload":42 ,"id":"1"}"#;
        assert_eq!(extract_payload(text).unwrap(), Some("42"));

        let text = r#"{"type":"x","payload":"a}b"}"#;
        assert_eq!(extract_payload(text).unwrap(), Some(r#""a}b""#));
    }

    #[test]
    fn test_missing_payload() {
        let text = r#"{"type":"connected","id":"1","timestamp":0}"#;
        assert_eq!(extract_payload(text).unwrap(), None);

        let envelope = decode(text).unwrap();
        assert!(envelope.raw_payload().is_none());
        assert!(envelope.payload::<Value>().is_err());
    }

    #[test]
    fn test_unbalanced_payload_is_protocol_error() {
        let text = r#"{"type":"x","payload":{"a":{"b":1}"#;
        assert!(matches!(extract_payload(text), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_header_and_lazy_payload() {
        #[derive(Deserialize)]
        struct Abort {
            reason: String,
        }

        let text = r#"{"type":"abort","id":"abc","timestamp":1700000000000,"payload":{"reason":"user {cancel}"}}"#;
        let envelope = decode(text).unwrap();

        assert_eq!(envelope.kind(), MessageType::Abort);
        assert_eq!(envelope.id, "abc");
        assert_eq!(envelope.timestamp, 1_700_000_000_000);
        assert_eq!(envelope.payload::<Abort>().unwrap().reason, "user {cancel}");
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        let err = decode(r#"{"id":"1","payload":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let envelope = decode(r#"{"type":"telemetry","payload":{}}"#).unwrap();
        assert_eq!(envelope.kind(), MessageType::Unknown("telemetry".to_string()));
        assert_eq!(envelope.kind().as_str(), "telemetry");
    }

    #[test]
    fn test_encode_shape() {
        let json = encode("heartbeat", &serde_json::json!({"testRunId": "r1"})).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["payload"]["testRunId"], "r1");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert!(uuid::Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_encode_ids_are_unique() {
        let a: Value = serde_json::from_str(&encode("heartbeat", &()).unwrap()).unwrap();
        let b: Value = serde_json::from_str(&encode("heartbeat", &()).unwrap()).unwrap();
        assert_ne!(a["id"], b["id"]);
    }
}
