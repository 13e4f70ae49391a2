//! Upstream Backend Integration
//!
//! Transport-level access to the inference backend through a common trait.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{BackendConfig, GenerateRequest, OllamaClient, UpstreamClient};
//!
//! let client = OllamaClient::new(BackendConfig::default())?;
//! let request = GenerateRequest::new("Hello!", "deepseek-r1:1.5b").with_stream(true);
//! let mut lines = client.generate_stream(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaClient;
pub use traits::{BackendConfig, GenerateRequest, LineReceiver, UpstreamClient, UpstreamError};
