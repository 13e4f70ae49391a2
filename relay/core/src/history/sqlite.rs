//! SQLite history store
//!
//! One table, `chat_history`, with an `AUTOINCREMENT` key so ids are never
//! reused. Writes go through a single connection behind a mutex and run on
//! the blocking pool; the insert and the id readback happen under the same
//! lock, which is what makes id assignment atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use super::{ChatExchange, HistoryError, HistoryStore, NewExchange};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    question  TEXT NOT NULL,
    answer    TEXT NOT NULL,
    model     TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
";

/// History persisted to a SQLite database
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HistoryError::Unavailable(format!(
                        "failed to create database directory {parent:?}: {e}"
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened chat history database");
        Ok(store)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| HistoryError::Task(e.to_string()))?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, exchange: NewExchange) -> Result<ChatExchange, HistoryError> {
        self.with_conn(move |conn| {
            let timestamp = Utc::now();
            conn.execute(
                "INSERT INTO chat_history (question, answer, model, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![exchange.question, exchange.answer, exchange.model, timestamp],
            )?;
            let id = conn.last_insert_rowid();

            Ok(ChatExchange {
                id,
                question: exchange.question,
                answer: exchange.answer,
                model: exchange.model,
                timestamp,
            })
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatExchange>, HistoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, answer, model, timestamp
                 FROM chat_history
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let mut records = stmt
                .query_map(params![limit], |row| {
                    Ok(ChatExchange {
                        id: row.get(0)?,
                        question: row.get(1)?,
                        answer: row.get(2)?,
                        model: row.get(3)?,
                        timestamp: row.get::<_, DateTime<Utc>>(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            records.reverse();
            Ok(records)
        })
        .await
    }
}
