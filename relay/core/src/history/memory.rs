//! In-memory history store

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ChatExchange, HistoryError, HistoryStore, NewExchange};

/// History kept in process memory; lost on restart
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<ChatExchange>>,
}

impl MemoryHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored exchanges
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been stored yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every stored exchange, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatExchange> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, exchange: NewExchange) -> Result<ChatExchange, HistoryError> {
        let mut records = self.records.lock();
        let id = records.last().map_or(1, |last| last.id + 1);
        let record = ChatExchange {
            id,
            question: exchange.question,
            answer: exchange.answer,
            model: exchange.model,
            timestamp: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatExchange>, HistoryError> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryHistoryStore::new();
        assert!(store.is_empty());

        let first = store.append(NewExchange::new("q1", "a1", "m")).await.unwrap();
        let second = store.append(NewExchange::new("q2", "a2", "m")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_returns_tail_oldest_first() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            store
                .append(NewExchange::new(format!("q{i}"), "a", "m"))
                .await
                .unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        let questions: Vec<_> = recent.iter().map(|r| r.question.as_str()).collect();
        assert_eq!(questions, vec!["q3", "q4"]);

        assert_eq!(store.recent(100).await.unwrap().len(), 5);
        assert!(store.recent(0).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_unique_ids() {
        let store = Arc::new(MemoryHistoryStore::new());

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append(NewExchange::new(format!("q{i}"), format!("a{i}"), "m"))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            let record = handle.await.unwrap();
            // Each record keeps its own question/answer pairing
            assert_eq!(record.question[1..], record.answer[1..]);
            ids.insert(record.id);
        }
        assert_eq!(ids.len(), 50);
    }
}
