//! Integration tests for the relay against a fake Ollama server
//!
//! A wiremock server stands in for `/api/generate`, so these tests exercise
//! the real HTTP client, the line reassembly, the decoder, the aggregator and
//! the SQLite store together. Stalls partway through a response are played
//! by a bare TCP listener, since wiremock only delays the response head.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::{
    BackendConfig, HistoryStore, OllamaClient, RelayConfig, RelayEvent, RelayService,
    SqliteHistoryStore, UpstreamClient, UpstreamError, ValidationError, DEFAULT_MODEL,
    UNAVAILABLE_PLACEHOLDER,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    relay: RelayService,
    store: Arc<SqliteHistoryStore>,
    _dir: TempDir,
}

fn harness(base_url: &str, timeout: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = RelayConfig::default();
    config.backend = BackendConfig::new(base_url).with_timeout(timeout);
    config.database_path = dir.path().join("chat.db");

    let upstream = Arc::new(OllamaClient::new(config.backend.clone()).unwrap());
    let store = Arc::new(SqliteHistoryStore::open(&config.database_path).unwrap());
    let relay = RelayService::new(upstream, store.clone(), &config);

    Harness {
        relay,
        store,
        _dir: dir,
    }
}

fn ndjson(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

/// Raw HTTP backend: reads one request, writes `reply`, then holds the
/// connection open without sending anything else
async fn stalling_backend(reply: String) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        // The JSON body is the last thing the client sends
        while !request.ends_with(b"}") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(reply.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    (format!("http://{addr}"), handle)
}

async fn collect(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// =============================================================================
// Blocking Mode
// =============================================================================

#[tokio::test]
async fn ask_relays_and_records_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "model": DEFAULT_MODEL,
            "prompt": "Why is the sky blue?",
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": DEFAULT_MODEL,
            "response": "Rayleigh scattering.",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let response = h.relay.ask("  Why is the sky blue?\n", None).await.unwrap();

    assert_eq!(response.answer, "Rayleigh scattering.");
    assert_eq!(response.model, DEFAULT_MODEL);

    let records = h.store.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].question, "Why is the sky blue?");
    assert_eq!(records[0].answer, response.answer);
    assert_eq!(records[0].model, response.model);
    assert_eq!(records[0].timestamp, response.timestamp);
}

#[tokio::test]
async fn ask_empty_question_touches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    assert_eq!(
        h.relay.ask(" \t ", None).await,
        Err(ValidationError::EmptyQuestion)
    );
    assert!(h.store.recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn ask_unreachable_backend_answers_with_placeholder() {
    // Nothing listens on the discard port
    let h = harness("http://127.0.0.1:9", Duration::from_secs(5));

    let response = h.relay.ask("hello?", None).await.unwrap();
    assert_eq!(response.answer, UNAVAILABLE_PLACEHOLDER);

    let records = h.store.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].answer, UNAVAILABLE_PLACEHOLDER);
}

#[tokio::test]
async fn ask_slow_backend_times_out_into_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "too late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_millis(200));
    let response = h.relay.ask("hello?", None).await.unwrap();
    assert_eq!(response.answer, UNAVAILABLE_PLACEHOLDER);
}

#[tokio::test]
async fn ask_backend_error_status_answers_with_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let response = h.relay.ask("hello?", None).await.unwrap();
    assert_eq!(response.answer, UNAVAILABLE_PLACEHOLDER);
}

// =============================================================================
// Streaming Mode
// =============================================================================

#[tokio::test]
async fn stream_forwards_fragments_and_records_concatenation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            r#"{"model":"m","response":"Hel","done":false}"#,
            r#"{"model":"m","response":"lo","done":false}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let events = collect(h.relay.ask_stream("greet me", None).unwrap()).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], RelayEvent::chunk("Hel"));
    assert_eq!(events[1], RelayEvent::chunk("lo"));
    assert!(events[2].is_done());

    let records = h.store.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].answer, "Hello");
}

#[tokio::test]
async fn stream_malformed_line_yields_one_error_and_keeps_going() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&[
            r#"{"response":"Hel"}"#,
            "not-json",
            r#"{"response":"lo"}"#,
        ])))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let events = collect(h.relay.ask_stream("greet me", None).unwrap()).await;

    let errors = events
        .iter()
        .filter(|e| matches!(e, RelayEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(events[0], RelayEvent::chunk("Hel"));
    assert_eq!(events[2], RelayEvent::chunk("lo"));
    assert_eq!(h.store.recent(1).await.unwrap()[0].answer, "Hello");
}

#[tokio::test]
async fn stream_final_line_without_newline_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"response\":\"a\"}\r\n{\"response\":\"b\",\"done\":true}"),
        )
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let events = collect(h.relay.ask_stream("q", None).unwrap()).await;

    assert_eq!(events[0], RelayEvent::chunk("a"));
    assert_eq!(events[1], RelayEvent::chunk("b"));
    assert_eq!(h.store.recent(1).await.unwrap()[0].answer, "ab");
}

#[tokio::test]
async fn stream_unreachable_backend_sends_error_then_done() {
    let h = harness("http://127.0.0.1:9", Duration::from_secs(5));
    let events = collect(h.relay.ask_stream("q", None).unwrap()).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], RelayEvent::Error { .. }));
    assert!(events[1].is_done());
    assert_eq!(
        h.store.recent(1).await.unwrap()[0].answer,
        UNAVAILABLE_PLACEHOLDER
    );
}

#[tokio::test]
async fn stream_response_head_is_bounded_by_idle_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ndjson(&[r#"{"response":"late"}"#]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(
        BackendConfig::new(server.uri()).with_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let request = relay_core::GenerateRequest::new("q", "m").with_stream(true);

    assert!(matches!(
        client.generate_stream(&request).await,
        Err(UpstreamError::Timeout(_))
    ));
}

#[tokio::test]
async fn stream_going_idle_after_first_line_keeps_partial_answer() {
    let line = "{\"response\":\"Hel\"}\n";
    let reply = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\n\
         transfer-encoding: chunked\r\n\r\n{:x}\r\n{line}\r\n",
        line.len()
    );
    let (url, backend) = stalling_backend(reply).await;

    let h = harness(&url, Duration::from_millis(300));
    let events = tokio::time::timeout(
        Duration::from_secs(5),
        collect(h.relay.ask_stream("greet me", None).unwrap()),
    )
    .await
    .expect("idle stream should end on its own");

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], RelayEvent::chunk("Hel"));
    assert_eq!(
        events[1],
        RelayEvent::error("backend did not respond within 300ms")
    );
    assert!(events[2].is_done());
    assert_eq!(h.store.recent(1).await.unwrap()[0].answer, "Hel");

    backend.abort();
}

#[tokio::test]
async fn stream_error_status_with_stalled_body_times_out() {
    let reply = "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\n\
                 content-length: 100\r\n\r\npartial"
        .to_string();
    let (url, backend) = stalling_backend(reply).await;

    let h = harness(&url, Duration::from_millis(300));
    let events = tokio::time::timeout(
        Duration::from_secs(5),
        collect(h.relay.ask_stream("hello?", None).unwrap()),
    )
    .await
    .expect("stalled error body should not hang the stream");

    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        RelayEvent::error("backend did not respond within 300ms")
    );
    assert!(events[1].is_done());
    assert_eq!(
        h.store.recent(1).await.unwrap()[0].answer,
        UNAVAILABLE_PLACEHOLDER
    );

    backend.abort();
}

#[tokio::test]
async fn stream_error_status_answers_with_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));
    let events = collect(h.relay.ask_stream("hello?", None).unwrap()).await;

    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        RelayEvent::error("backend returned 500: out of memory")
    );
    assert!(events[1].is_done());
    assert_eq!(
        h.store.recent(1).await.unwrap()[0].answer,
        UNAVAILABLE_PLACEHOLDER
    );
}

#[tokio::test]
async fn concurrent_exchanges_are_recorded_independently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "same answer"
        })))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), Duration::from_secs(5));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let relay = h.relay.clone();
        tasks.spawn(async move { relay.ask(&format!("question {i}"), None).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap().answer, "same answer");
    }

    let records = h.store.recent(100).await.unwrap();
    assert_eq!(records.len(), 16);
    let ids: HashSet<_> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 16);
}
