//! Relay Core - Question Relay for a Local LLM Backend
//!
//! This crate relays user questions to a locally hosted inference server
//! (Ollama's `/api/generate`), records every exchange, and hands the answer
//! back either whole or as a stream of fragments. It has no HTTP server code;
//! the `relay-daemon` crate puts it behind HTTP.
//!
//! # Architecture
//!
//! ```text
//!   question
//!      │
//!      ▼
//! ┌──────────────┐  generate / generate_stream  ┌────────────────┐
//! │ RelayService │ ───────────────────────────► │ UpstreamClient │
//! │              │ ◄─── payload / raw lines ─── │   (Ollama)     │
//! │              │                              └────────────────┘
//! │              │ ─► ChunkDecoder ─► StreamAggregator ─► RelayEvent ─► client
//! │              │
//! │              │ ─── append ───► HistoryStore (SQLite / memory)
//! └──────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RelayService`]: validates, dispatches, aggregates, persists
//! - [`UpstreamClient`]: transport to the backend ([`OllamaClient`])
//! - [`ChunkDecoder`]: raw stream lines to [`StreamFragment`]s
//! - [`StreamAggregator`]: fragments to forwarded events and the final answer
//! - [`HistoryStore`]: append-only [`ChatExchange`] records
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{load_config, OllamaClient, RelayService, SqliteHistoryStore};
//!
//! let config = load_config()?;
//! let upstream = Arc::new(OllamaClient::new(config.backend.clone())?);
//! let store = Arc::new(SqliteHistoryStore::open(&config.database_path)?);
//! let relay = RelayService::new(upstream, store, &config);
//!
//! let answer = relay.ask("Why is the sky blue?", None).await?;
//! let mut events = relay.ask_stream("And the sea?", None)?;
//! while let Some(event) = events.recv().await {
//!     // forward to the client
//! }
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod decoder;
pub mod history;
pub mod messages;
pub mod relay;

// Re-exports for convenience
pub use aggregator::{
    StreamAggregator, StreamSummary, PARSE_FAILURE_PLACEHOLDER, UNAVAILABLE_PLACEHOLDER,
};
pub use backend::{
    BackendConfig, GenerateRequest, LineReceiver, OllamaClient, UpstreamClient, UpstreamError,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig, RelayToml, DEFAULT_MODEL,
};
pub use decoder::{decode_line, decode_lines, ChunkDecoder, LineBuffer, StreamFragment};
pub use history::{
    ChatExchange, HistoryError, HistoryStore, MemoryHistoryStore, NewExchange, SqliteHistoryStore,
};
pub use messages::{AskRequest, AskResponse, RelayEvent};
pub use relay::{RelayService, RelayState, ValidationError};
