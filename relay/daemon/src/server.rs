//! HTTP Surface
//!
//! Puts a [`RelayService`] behind axum:
//!
//! ```text
//! POST /api/ask         {question, model?} -> {answer, model, timestamp}
//! POST /api/ask-stream  {question, model?} -> text/event-stream
//! GET  /api/history     ?limit=N           -> [ChatExchange], oldest first
//! GET  /health                             -> {status, backend}
//! ```
//!
//! The stream sends each fragment as an unnamed event whose data is
//! `{"chunk": ...}` or `{"error": ...}`, then one event named `done`. A
//! rejected question gets a plain `400` before any event is written. When
//! the client goes away the response body is dropped, which drops the event
//! receiver and stops the relay's backend read.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use relay_core::{
    AskRequest, AskResponse, ChatExchange, HistoryStore, MemoryHistoryStore, OllamaClient,
    RelayConfig, RelayEvent, RelayService, SqliteHistoryStore,
};

use crate::error::ApiResult;

/// History entries returned when the client names no limit
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound on one history page
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Shared handler state
pub struct AppState {
    /// The relay every handler talks to
    pub relay: RelayService,
}

/// Build the relay described by `config`
///
/// # Errors
///
/// Fails if the HTTP client cannot be built or the database cannot be opened.
pub fn build_state(config: &RelayConfig) -> anyhow::Result<Arc<AppState>> {
    let upstream = Arc::new(
        OllamaClient::new(config.backend.clone()).context("Failed to create backend client")?,
    );

    let store: Arc<dyn HistoryStore> = if config.in_memory_history {
        info!("Keeping chat history in memory only");
        Arc::new(MemoryHistoryStore::new())
    } else {
        Arc::new(
            SqliteHistoryStore::open(&config.database_path).with_context(|| {
                format!("Failed to open history database {:?}", config.database_path)
            })?,
        )
    };

    info!(
        backend = %config.backend.base_url,
        model = %config.default_model,
        "Relay ready"
    );

    Ok(Arc::new(AppState {
        relay: RelayService::new(upstream, store, config),
    }))
}

/// Router with every route, CORS for all origins and request tracing
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/ask", post(ask))
        .route("/ask-stream", post(ask_stream))
        .route("/history", get(history));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn ask(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<Json<AskResponse>> {
    let Json(request) = body?;
    let response = state
        .relay
        .ask(&request.question, request.model.as_deref())
        .await?;
    Ok(Json(response))
}

async fn ask_stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let Json(request) = body?;
    let events = state
        .relay
        .ask_stream(&request.question, request.model.as_deref())?;

    let stream =
        tokio_stream::StreamExt::map(ReceiverStream::new(events), |event| Ok(to_sse(&event)));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn to_sse(event: &RelayEvent) -> SseEvent {
    let sse_event = if event.is_done() {
        SseEvent::default().event("done")
    } else {
        SseEvent::default()
    };
    match sse_event.json_data(event) {
        Ok(ev) => ev,
        Err(err) => {
            error!(error = %err, "Failed to serialize stream event");
            SseEvent::default().data(r#"{"error":"event serialization failed"}"#)
        }
    }
}

/// Query string of `GET /api/history`
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// How many of the most recent exchanges to return
    pub limit: Option<usize>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ChatExchange>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let records = state.relay.recent_history(limit).await?;
    Ok(Json(records))
}

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// `ok` when the backend answers, `degraded` otherwise
    pub status: String,
    /// `reachable` or `unreachable`
    pub backend: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let healthy = state.relay.backend_healthy().await;
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        backend: if healthy { "reachable" } else { "unreachable" }.to_string(),
    })
}

