//! Relay Messages
//!
//! Wire types exchanged with clients of the relay: the inbound question, the
//! blocking answer, and the events of a streamed answer.
//!
//! The shapes are fixed by the HTTP surface:
//! - `ask` returns `{"answer", "model", "timestamp"}`
//! - `ask-stream` emits `{"chunk": ...}` or `{"error": ...}` per event, then a
//!   terminal `{"done": true, "model", "timestamp"}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound question
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    /// The question text, trimmed before use
    #[serde(default)]
    pub question: String,
    /// Model override; the configured default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AskRequest {
    /// Create a request for the default model
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            model: None,
        }
    }

    /// Override the model for this request
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// The blocking answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    /// Answer text, or a placeholder when the backend failed
    pub answer: String,
    /// Model that was asked
    pub model: String,
    /// When the exchange was recorded
    pub timestamp: DateTime<Utc>,
}

/// One event of a streamed answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    /// A piece of answer text, forwarded as soon as it arrived
    Chunk {
        /// The text
        chunk: String,
    },
    /// A line that failed to decode, or a backend failure
    Error {
        /// Human-readable description
        error: String,
    },
    /// End of stream; nothing follows
    Done {
        /// Always `true`
        done: bool,
        /// Model that was asked
        model: String,
        /// When the exchange was recorded
        timestamp: DateTime<Utc>,
    },
}

impl RelayEvent {
    /// Create a chunk event
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { chunk: text.into() }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Create the terminal event
    pub fn done(model: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Done {
            done: true,
            model: model.into(),
            timestamp,
        }
    }

    /// Whether this is the end-of-stream marker
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ask_request_missing_fields_default() {
        let request: AskRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.question, "");
        assert_eq!(request.model, None);

        let request: AskRequest =
            serde_json::from_str(r#"{"question":"hi","model":"llama3.2"}"#).unwrap();
        assert_eq!(request, AskRequest::new("hi").with_model("llama3.2"));
    }

    #[test]
    fn test_relay_event_wire_shapes() {
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();

        assert_eq!(
            serde_json::to_value(RelayEvent::chunk("Hel")).unwrap(),
            serde_json::json!({"chunk": "Hel"})
        );
        assert_eq!(
            serde_json::to_value(RelayEvent::error("boom")).unwrap(),
            serde_json::json!({"error": "boom"})
        );
        assert_eq!(
            serde_json::to_value(RelayEvent::done("m", ts)).unwrap(),
            serde_json::json!({"done": true, "model": "m", "timestamp": "2025-02-01T12:00:00Z"})
        );
        assert!(RelayEvent::done("m", ts).is_done());
        assert!(!RelayEvent::chunk("x").is_done());
    }
}
