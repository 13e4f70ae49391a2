//! Response Aggregation
//!
//! Reduces whatever the backend produced to the single answer string that is
//! stored and returned. When the backend failed or sent nothing decodable, a
//! fixed placeholder stands in for the text.

use serde_json::Value;

use crate::backend::UpstreamError;
use crate::decoder::StreamFragment;
use crate::messages::RelayEvent;

/// Stored and returned when the backend could not be reached or timed out
pub const UNAVAILABLE_PLACEHOLDER: &str = "AI service unavailable, try again later";

/// Stored and returned when the backend answered but no text could be extracted
pub const PARSE_FAILURE_PLACEHOLDER: &str = "response parse failure";

/// Extract the answer from a blocking `generate` payload
#[must_use]
pub fn from_blocking(payload: &Value) -> String {
    match payload.get("response").and_then(Value::as_str) {
        Some(answer) => answer.to_string(),
        None => PARSE_FAILURE_PLACEHOLDER.to_string(),
    }
}

/// Answer for a blocking call that failed before a payload was available
#[must_use]
pub fn from_blocking_failure(error: &UpstreamError) -> String {
    match error {
        UpstreamError::Decode(_) => PARSE_FAILURE_PLACEHOLDER.to_string(),
        UpstreamError::Unavailable(_) | UpstreamError::Timeout(_) | UpstreamError::Status { .. } => {
            UNAVAILABLE_PLACEHOLDER.to_string()
        }
    }
}

/// Outcome of a finished stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    /// The answer to store
    pub answer: String,
    /// Text fragments received
    pub text_fragments: u32,
    /// Fragments that failed to decode or reported a backend error
    pub error_fragments: u32,
    /// Whether the transport failed (before or during the stream)
    pub upstream_failed: bool,
}

/// Accumulates streamed fragments into the final answer
///
/// Each call returns the event to forward to the client, so forwarding and
/// aggregation never disagree about order.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    answer: String,
    text_fragments: u32,
    error_fragments: u32,
    upstream_failed: bool,
}

impl StreamAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded fragment and return the event to forward
    pub fn push(&mut self, fragment: StreamFragment) -> RelayEvent {
        match fragment {
            StreamFragment::Text(text) => {
                self.text_fragments += 1;
                self.answer.push_str(&text);
                RelayEvent::chunk(text)
            }
            StreamFragment::Error(error) => {
                self.error_fragments += 1;
                RelayEvent::error(error)
            }
        }
    }

    /// Record a transport failure and return the event to forward
    pub fn fail(&mut self, error: &UpstreamError) -> RelayEvent {
        self.upstream_failed = true;
        RelayEvent::error(error.to_string())
    }

    /// Text accumulated so far
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Close the aggregation and produce the answer to store
    ///
    /// With no text at all, the answer is the unavailable placeholder if the
    /// transport failed, the parse-failure placeholder if some line failed
    /// to decode, and empty otherwise (the stream ended or the client left
    /// before anything arrived).
    #[must_use]
    pub fn finish(self) -> StreamSummary {
        let answer = if self.text_fragments > 0 {
            self.answer
        } else if self.upstream_failed {
            UNAVAILABLE_PLACEHOLDER.to_string()
        } else if self.error_fragments > 0 {
            PARSE_FAILURE_PLACEHOLDER.to_string()
        } else {
            String::new()
        };

        StreamSummary {
            answer,
            text_fragments: self.text_fragments,
            error_fragments: self.error_fragments,
            upstream_failed: self.upstream_failed,
        }
    }
}
