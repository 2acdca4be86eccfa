//! Event interpreter: classify one frame payload.

use serde_json::Value;

/// Literal terminal sentinel used by the combined `/generate` protocol.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Substring that marks an unparseable payload as an error report.
pub const ERROR_SIGNATURE: &str = "error";

/// A typed event derived from one [`StreamFrame`](crate::frame::StreamFrame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// An incremental text fragment.
    Token(String),
    /// The backend reported an error.
    Error(String),
    /// The stream has logically ended.
    Done { animation_id: Option<String> },
    /// A well-formed record with none of the recognized fields.
    Unknown(String),
    /// The payload is not a JSON object.
    Malformed(String),
}

/// Classifies frame payloads.
///
/// Priority for a parsed record: `error` field, then a done marker, then
/// `token`. The literal sentinel is matched against the `event` field of a
/// parsed record or against an unparseable payload, never against token text,
/// so a token that happens to contain `[DONE]` is still a token.
#[derive(Debug, Clone, Default)]
pub struct EventInterpreter {
    sentinel: Option<String>,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat `sentinel` as a terminal marker.
    pub fn with_sentinel(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: Some(sentinel.into()),
        }
    }

    pub fn sentinel(&self) -> Option<&str> {
        self.sentinel.as_deref()
    }

    pub fn interpret(&self, payload: &str) -> GenerationEvent {
        let record = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(record)) => record,
            _ => {
                if self.sentinel.as_deref().is_some_and(|s| payload.contains(s)) {
                    return GenerationEvent::Done { animation_id: None };
                }
                return GenerationEvent::Malformed(payload.to_string());
            }
        };

        match record.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => return GenerationEvent::Error(message.clone()),
            Some(other) => return GenerationEvent::Error(other.to_string()),
        }

        if let Some(event) = record.get("event").and_then(Value::as_str) {
            if event == "error" {
                let message = record
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("backend reported an error")
                    .to_string();
                return GenerationEvent::Error(message);
            }
            if event == "done" {
                let animation_id = record
                    .get("animation_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return GenerationEvent::Done { animation_id };
            }
            if self.sentinel.as_deref() == Some(event) {
                return GenerationEvent::Done { animation_id: None };
            }
        }

        if let Some(token) = record.get("token").and_then(Value::as_str) {
            return GenerationEvent::Token(token.to_string());
        }

        GenerationEvent::Unknown(payload.to_string())
    }
}

/// Heuristic for inconsistently shaped backend errors: an unparseable payload
/// that mentions `error` is treated as an error report rather than noise.
/// Case-sensitive substring match; callers decide whether to apply it.
pub fn is_error_signature(raw: &str) -> bool {
    raw.contains(ERROR_SIGNATURE)
}

/// Message used when a malformed payload is escalated to an error.
pub fn escalated_message(raw: &str) -> String {
    format!("Received error from server: {raw}")
}
