//! Chat History
//!
//! Append-only record of every question/answer exchange.
//!
//! # Design Philosophy
//!
//! An exchange is written exactly once, when its answer (or the placeholder
//! standing in for it) is known. Nothing here updates or deletes records.
//! The store assigns `id` and `timestamp` itself, atomically per append, so
//! concurrent requests never see each other's ids.
//!
//! # Backends
//!
//! - [`SqliteHistoryStore`]: durable, the default for the daemon
//! - [`MemoryHistoryStore`]: process-local, for tests and throwaway runs

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// A persisted exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExchange {
    /// Store-assigned id, strictly increasing
    pub id: i64,
    /// The trimmed question
    pub question: String,
    /// The answer or placeholder
    pub answer: String,
    /// Model that was asked
    pub model: String,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
}

/// An exchange about to be appended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewExchange {
    /// The trimmed question
    pub question: String,
    /// The answer or placeholder
    pub answer: String,
    /// Model that was asked
    pub model: String,
}

impl NewExchange {
    /// Create a new exchange
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            model: model.into(),
        }
    }
}

/// Errors from a history backend
#[derive(Debug, Error)]
pub enum HistoryError {
    /// SQLite failed
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking storage task panicked or was cancelled
    #[error("storage task failed: {0}")]
    Task(String),

    /// The store refused the write
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only exchange store
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one exchange, assigning its id and timestamp
    async fn append(&self, exchange: NewExchange) -> Result<ChatExchange, HistoryError>;

    /// The `limit` most recent exchanges, oldest first
    async fn recent(&self, limit: usize) -> Result<Vec<ChatExchange>, HistoryError>;
}
