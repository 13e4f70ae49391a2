//! Relay Daemon - HTTP surface for the question relay
//!
//! The binary in `main.rs` parses arguments, loads configuration and serves
//! the router built here. The library half exists so the routes can be
//! driven in tests without binding a socket.

#![warn(missing_docs)]

pub mod error;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{app_router, build_state, AppState, HealthResponse, HistoryQuery};
