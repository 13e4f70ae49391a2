//! Relay Service - The Request Orchestrator
//!
//! Drives one question through its lifecycle:
//!
//! ```text
//! Validating ──► Dispatching ──► BlockingWait ─────┐
//!     │                  └─────► StreamingConsume ─┤
//!     ▼                                            ▼
//!  Rejected                Persisting ──► Responding ──► Done
//! ```
//!
//! Only validation can fail a request. Backend, decode and storage failures
//! are absorbed: the backend ones become a placeholder answer or an error
//! event, storage failures are logged. The client always gets an answer.
//!
//! # Streaming
//!
//! [`RelayService::ask_stream`] returns a receiver right away and runs the
//! exchange on a spawned task. That task forwards each fragment as soon as
//! it is decoded and stops reading from the backend once the receiver is
//! dropped. Whatever was aggregated by then is still persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregator::{self, StreamAggregator};
use crate::backend::{GenerateRequest, UpstreamClient};
use crate::config::RelayConfig;
use crate::decoder::ChunkDecoder;
use crate::history::{ChatExchange, HistoryError, HistoryStore, NewExchange};
use crate::messages::{AskResponse, RelayEvent};

/// Why a question was rejected before reaching the backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Empty or whitespace-only question
    #[error("question must not be empty")]
    EmptyQuestion,

    /// Question longer than the configured bound
    #[error("question is {actual} characters long, the limit is {max}")]
    QuestionTooLong {
        /// Configured limit
        max: usize,
        /// Length after trimming
        actual: usize,
    },
}

/// Per-request lifecycle state, reported in logs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    /// Checking the question
    Validating,
    /// Question refused; terminal
    Rejected,
    /// Calling the backend
    Dispatching,
    /// Waiting for the blocking payload
    BlockingWait,
    /// Forwarding stream fragments
    StreamingConsume,
    /// Writing the exchange
    Persisting,
    /// Emitting the final response or end-of-stream marker
    Responding,
    /// Finished
    Done,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Dispatching => "dispatching",
            Self::BlockingWait => "blocking-wait",
            Self::StreamingConsume => "streaming-consume",
            Self::Persisting => "persisting",
            Self::Responding => "responding",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Relays questions to the backend and records every exchange
///
/// Cheap to clone; clones share the backend client, the store and the
/// request counter.
#[derive(Clone)]
pub struct RelayService {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<dyn HistoryStore>,
    default_model: String,
    max_question_chars: usize,
    stream_capacity: usize,
    next_request_id: Arc<AtomicU64>,
}

impl RelayService {
    /// Create a relay over the given backend and store
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn HistoryStore>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            upstream,
            store,
            default_model: config.default_model.clone(),
            max_question_chars: config.max_question_chars,
            stream_capacity: config.backend.stream_channel_capacity.max(1),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Model used when a request names none
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Check the question and return it trimmed
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for empty or over-long questions.
    pub fn validate(&self, question: &str) -> Result<String, ValidationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion);
        }
        let actual = question.chars().count();
        if actual > self.max_question_chars {
            return Err(ValidationError::QuestionTooLong {
                max: self.max_question_chars,
                actual,
            });
        }
        Ok(question.to_string())
    }

    /// Ask a question and wait for the whole answer
    ///
    /// # Errors
    ///
    /// Only [`ValidationError`]; backend failures yield a placeholder answer.
    pub async fn ask(
        &self,
        question: &str,
        model: Option<&str>,
    ) -> Result<AskResponse, ValidationError> {
        let request_id = self.next_request_id();
        let question = self.admit(request_id, question)?;
        let model = self.resolve_model(model);

        transition(request_id, RelayState::Dispatching);
        let request = GenerateRequest::new(question.clone(), model.clone()).with_stream(false);

        transition(request_id, RelayState::BlockingWait);
        let answer = match self.upstream.generate(&request).await {
            Ok(payload) => aggregator::from_blocking(&payload),
            Err(e) => {
                warn!(
                    request_id,
                    backend = self.upstream.name(),
                    error = %e,
                    "Backend call failed, answering with placeholder"
                );
                aggregator::from_blocking_failure(&e)
            }
        };

        let timestamp = self
            .persist(request_id, NewExchange::new(question, answer.clone(), model.clone()))
            .await;

        transition(request_id, RelayState::Responding);
        let response = AskResponse {
            answer,
            model,
            timestamp,
        };
        transition(request_id, RelayState::Done);
        Ok(response)
    }

    /// Ask a question and receive the answer as it is generated
    ///
    /// The receiver yields [`RelayEvent::Chunk`] and [`RelayEvent::Error`]
    /// events in arrival order, then one [`RelayEvent::Done`], then closes.
    /// Dropping the receiver cancels the backend read.
    ///
    /// # Errors
    ///
    /// Only [`ValidationError`], before anything is sent to the backend.
    pub fn ask_stream(
        &self,
        question: &str,
        model: Option<&str>,
    ) -> Result<mpsc::Receiver<RelayEvent>, ValidationError> {
        let request_id = self.next_request_id();
        let question = self.admit(request_id, question)?;
        let model = self.resolve_model(model);

        let (tx, rx) = mpsc::channel(self.stream_capacity);
        let relay = self.clone();
        tokio::spawn(async move {
            relay.run_stream(request_id, question, model, tx).await;
        });

        Ok(rx)
    }

    /// The most recent exchanges, oldest first
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<ChatExchange>, HistoryError> {
        self.store.recent(limit).await
    }

    /// Whether the backend answers its health probe
    pub async fn backend_healthy(&self) -> bool {
        self.upstream.health_check().await
    }

    async fn run_stream(
        &self,
        request_id: u64,
        question: String,
        model: String,
        sink: mpsc::Sender<RelayEvent>,
    ) {
        transition(request_id, RelayState::Dispatching);
        let request = GenerateRequest::new(question.clone(), model.clone()).with_stream(true);

        let mut aggregator = StreamAggregator::new();
        let mut client_gone = false;

        match self.upstream.generate_stream(&request).await {
            Err(e) => {
                warn!(
                    request_id,
                    backend = self.upstream.name(),
                    error = %e,
                    "Backend stream failed to start"
                );
                client_gone = sink.send(aggregator.fail(&e)).await.is_err();
            }
            Ok(lines) => {
                transition(request_id, RelayState::StreamingConsume);
                let mut decoder = ChunkDecoder::new(lines);

                loop {
                    let item = tokio::select! {
                        () = sink.closed() => {
                            client_gone = true;
                            break;
                        }
                        item = decoder.next() => item,
                    };

                    let event = match item {
                        Some(Ok(fragment)) => aggregator.push(fragment),
                        Some(Err(e)) => {
                            warn!(request_id, error = %e, "Backend stream broke");
                            aggregator.fail(&e)
                        }
                        None => break,
                    };

                    if sink.send(event).await.is_err() {
                        client_gone = true;
                        break;
                    }
                }

                debug!(request_id, lines = decoder.lines_seen(), "Stream consumed");
                // Dropping the decoder closes the line channel and stops the reader
            }
        }

        if client_gone {
            info!(request_id, "Client disconnected mid-stream, backend read aborted");
        }

        let summary = aggregator.finish();
        debug!(
            request_id,
            text_fragments = summary.text_fragments,
            error_fragments = summary.error_fragments,
            upstream_failed = summary.upstream_failed,
            "Stream aggregated"
        );

        let timestamp = self
            .persist(request_id, NewExchange::new(question, summary.answer, model.clone()))
            .await;

        if !client_gone {
            transition(request_id, RelayState::Responding);
            let _ = sink.send(RelayEvent::done(model, timestamp)).await;
        }
        transition(request_id, RelayState::Done);
    }

    /// Validate and log the verdict
    fn admit(&self, request_id: u64, question: &str) -> Result<String, ValidationError> {
        transition(request_id, RelayState::Validating);
        self.validate(question).inspect_err(|e| {
            debug!(request_id, reason = %e, "Question rejected");
            transition(request_id, RelayState::Rejected);
        })
    }

    /// Best-effort write; returns the record's timestamp, or now if the write failed
    async fn persist(&self, request_id: u64, exchange: NewExchange) -> DateTime<Utc> {
        transition(request_id, RelayState::Persisting);
        match self.store.append(exchange).await {
            Ok(record) => {
                debug!(request_id, exchange_id = record.id, "Exchange recorded");
                record.timestamp
            }
            Err(e) => {
                error!(request_id, error = %e, "Failed to record exchange");
                Utc::now()
            }
        }
    }

    fn resolve_model(&self, model: Option<&str>) -> String {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model)
            .to_string()
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn transition(request_id: u64, state: RelayState) {
    debug!(request_id, state = %state, "Relay state");
}
