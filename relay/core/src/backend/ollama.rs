//! Ollama Backend Implementation
//!
//! Upstream client for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions (streaming or batch)
//! - `/api/tags` - List available models (used as a health probe)
//!
//! With `"stream": true` the generate endpoint answers with one JSON object
//! per line; with `"stream": false` it answers with a single object. Either
//! way the text lives in the `response` field.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{BackendConfig, GenerateRequest, LineReceiver, UpstreamClient, UpstreamError};
use crate::decoder::LineBuffer;

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaClient {
    /// Connection settings
    config: BackendConfig,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Unavailable`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(config: BackendConfig) -> Result<Self, UpstreamError> {
        // No client-wide timeout: streams may legitimately run for minutes.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the base URL without a trailing slash
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Get the connection settings
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

/// Map a reqwest failure onto the relay's upstream taxonomy
fn classify(err: &reqwest::Error, bound: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(bound)
    } else {
        UpstreamError::Unavailable(err.to_string())
    }
}

/// Turn a non-success response into [`UpstreamError::Status`]
///
/// Reading the error body is bounded by `bound`; a body that stalls past it
/// is reported as [`UpstreamError::Timeout`].
async fn check_status(
    response: reqwest::Response,
    bound: Duration,
) -> Result<reqwest::Response, UpstreamError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = tokio::time::timeout(bound, response.text())
        .await
        .map_err(|_| UpstreamError::Timeout(bound))?
        .unwrap_or_default();
    Err(UpstreamError::Status { status, body })
}

#[async_trait]
impl UpstreamClient for OllamaClient {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Backend health check failed");
                false
            }
        }
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<serde_json::Value, UpstreamError> {
        let bound = self.config.request_timeout;

        let response = self
            .http_client
            .post(self.generate_url())
            .timeout(bound)
            .json(request)
            .send()
            .await
            .map_err(|e| classify(&e, bound))?;

        let response = check_status(response, bound).await?;

        // The per-request timeout also covers reading the body
        let body = response.bytes().await.map_err(|e| classify(&e, bound))?;

        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<LineReceiver, UpstreamError> {
        let idle = self.config.stream_idle_timeout;

        // Waiting for the response head counts as idle time too
        let response = tokio::time::timeout(
            idle,
            self.http_client
                .post(self.generate_url())
                .json(request)
                .send(),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(idle))?
        .map_err(|e| classify(&e, idle))?;

        let response = check_status(response, idle).await?;

        let (tx, rx) = mpsc::channel(self.config.stream_channel_capacity.max(1));
        let mut stream = response.bytes_stream();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut buffer = LineBuffer::new();

            loop {
                let next = tokio::select! {
                    () = tx.closed() => {
                        debug!("Stream consumer went away, aborting upstream read");
                        return;
                    }
                    next = tokio::time::timeout(idle, stream.next()) => next,
                };

                match next {
                    Ok(Some(Ok(bytes))) => {
                        for line in buffer.push(&bytes) {
                            if tx.send(Ok(line)).await.is_err() {
                                // Receiver dropped, stop streaming
                                return;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "Upstream stream broke");
                        let _ = tx.send(Err(classify(&e, idle))).await;
                        return;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(idle = ?idle, "Upstream stream went idle");
                        let _ = tx.send(Err(UpstreamError::Timeout(idle))).await;
                        return;
                    }
                }
            }

            // Stream ended; the last line may lack its newline
            if let Some(line) = buffer.finish() {
                let _ = tx.send(Ok(line)).await;
            }
        });

        Ok(rx)
    }
}
