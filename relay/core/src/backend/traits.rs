//! Upstream Client Traits
//!
//! Trait definitions for the inference backend. The relay only needs two
//! calls from a backend: a blocking generate that returns the raw JSON
//! payload, and a streaming generate that yields raw lines as they arrive.
//!
//! # Design Philosophy
//!
//! The client does transport only. It does not look inside the payload or the
//! stream lines; that is the job of [`crate::decoder`] and [`crate::aggregator`].
//! It never retries. A failed call is reported once and the relay decides what
//! the user sees.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures talking to the inference backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Connection refused, reset, DNS failure and similar transport problems
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No response (blocking) or no data (streaming) within the bound
    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),

    /// The backend answered with a non-success HTTP status
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// A blocking response body that is not JSON
    #[error("backend payload is not valid JSON: {0}")]
    Decode(String),
}

/// Raw lines of a streaming response, in arrival order
///
/// A transport failure arrives as a final `Err` item; the channel closes after
/// it. The producer stops reading from the backend once this receiver is
/// dropped.
pub type LineReceiver = mpsc::Receiver<Result<String, UpstreamError>>;

/// Body of a `generate` call
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerateRequest {
    /// Backend model identifier
    pub model: String,
    /// The user's question, sent as-is
    pub prompt: String,
    /// Whether the backend should stream newline-delimited JSON
    pub stream: bool,
}

impl GenerateRequest {
    /// Create a non-streaming request
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Inference backend client
///
/// Implement this trait to relay to something other than Ollama, or to fake
/// the backend in tests.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Backend name for logs (e.g. "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Send a blocking request and return the raw JSON payload
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<serde_json::Value, UpstreamError>;

    /// Send a streaming request and return the raw line sequence
    ///
    /// Errors returned here mean the stream never started. Errors after the
    /// first byte arrive on the receiver.
    async fn generate_stream(&self, request: &GenerateRequest)
        -> Result<LineReceiver, UpstreamError>;
}

/// Connection settings for the inference backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://localhost:11434`
    pub base_url: String,
    /// End-to-end bound for a blocking call
    pub request_timeout: Duration,
    /// Longest silence tolerated between two chunks of a stream
    pub stream_idle_timeout: Duration,
    /// TCP connect bound
    pub connect_timeout: Duration,
    /// Lines buffered between the stream reader and its consumer
    pub stream_channel_capacity: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            stream_channel_capacity: 100,
        }
    }
}

impl BackendConfig {
    /// Create a configuration for the given base URL with default timeouts
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set both the blocking and the streaming idle timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self.stream_idle_timeout = timeout;
        self
    }
}
