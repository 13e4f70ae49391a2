//! Relay Configuration
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/ask-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! url = "http://localhost:11434"
//! default_model = "deepseek-r1:1.5b"
//! request_timeout_secs = 300
//! stream_idle_timeout_secs = 300
//!
//! [server]
//! listen_addr = "127.0.0.1:5000"
//!
//! [storage]
//! database_path = "chat.db"
//!
//! [limits]
//! max_question_chars = 4000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;

/// Model used when a request does not name one
pub const DEFAULT_MODEL: &str = "deepseek-r1:1.5b";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Base URL of the inference server
    pub url: Option<String>,
    /// Model used when a request names none
    pub default_model: Option<String>,
    /// End-to-end timeout for blocking calls
    pub request_timeout_secs: Option<u64>,
    /// Idle timeout between stream chunks
    pub stream_idle_timeout_secs: Option<u64>,
    /// TCP connect timeout
    pub connect_timeout_secs: Option<u64>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP surface binds to
    pub listen_addr: Option<String>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// SQLite database file
    pub database_path: Option<PathBuf>,
    /// Keep history in memory only
    pub in_memory: Option<bool>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Longest accepted question, in characters after trimming
    pub max_question_chars: Option<usize>,
    /// Events buffered per stream between relay and client
    pub stream_channel_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Backend configuration section
    pub backend: BackendToml,
    /// Server configuration section
    pub server: ServerToml,
    /// Storage configuration section
    pub storage: StorageToml,
    /// Limits configuration section
    pub limits: LimitsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Complete relay configuration
///
/// Passed explicitly to the client, the store and the relay service; nothing
/// reads configuration from ambient state after loading.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Backend connection settings
    pub backend: BackendConfig,
    /// Model used when a request names none
    pub default_model: String,
    /// Address the HTTP surface binds to
    pub listen_addr: SocketAddr,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Keep history in memory only
    pub in_memory_history: bool,
    /// Longest accepted question, in characters after trimming
    pub max_question_chars: usize,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            default_model: DEFAULT_MODEL.to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database_path: PathBuf::from("chat.db"),
            in_memory_history: false,
            max_question_chars: 4000,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the relay misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "backend url must start with http:// or https://, got {url:?}"
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default model must not be empty".to_string(),
            ));
        }
        if self.backend.request_timeout.is_zero() || self.backend.stream_idle_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_question_chars == 0 {
            return Err(ConfigError::ValidationError(
                "max_question_chars must be greater than zero".to_string(),
            ));
        }
        if self.backend.stream_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of everything else
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref url) = overrides.backend_url {
            self.backend.base_url = url.clone();
            self.source = ConfigSource::Cli;
        }
        if let Some(ref model) = overrides.default_model {
            self.default_model = model.clone();
            self.source = ConfigSource::Cli;
        }
        if let Some(addr) = overrides.listen_addr {
            self.listen_addr = addr;
            self.source = ConfigSource::Cli;
        }
        if let Some(ref path) = overrides.database_path {
            self.database_path = path.clone();
            self.source = ConfigSource::Cli;
        }
        if overrides.in_memory_history {
            self.in_memory_history = true;
            self.source = ConfigSource::Cli;
        }
    }
}

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend base URL
    pub backend_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Listen address
    pub listen_addr: Option<SocketAddr>,
    /// Database file
    pub database_path: Option<PathBuf>,
    /// Force in-memory history
    pub in_memory_history: bool,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ask-relay/relay.toml` or
/// `~/.config/ask-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ask-relay").join("relay.toml"))
}

/// Load configuration from the default file path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting configuration is invalid.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// A missing file is not an error (defaults are used).
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env)?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(ref url) = toml.backend.url {
        config.backend.base_url = url.clone();
    }
    if let Some(ref model) = toml.backend.default_model {
        config.default_model = model.clone();
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.stream_idle_timeout_secs {
        config.backend.stream_idle_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.connect_timeout_secs {
        config.backend.connect_timeout = Duration::from_secs(secs);
    }

    if let Some(ref addr) = toml.server.listen_addr {
        config.listen_addr = parse_addr(addr)?;
    }

    if let Some(ref path) = toml.storage.database_path {
        config.database_path = path.clone();
    }
    if let Some(in_memory) = toml.storage.in_memory {
        config.in_memory_history = in_memory;
    }

    if let Some(max) = toml.limits.max_question_chars {
        config.max_question_chars = max;
    }
    if let Some(capacity) = toml.limits.stream_channel_capacity {
        config.backend.stream_channel_capacity = capacity;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RelayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("RELAY_BACKEND_URL") {
        config.backend.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("RELAY_DEFAULT_MODEL") {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("RELAY_REQUEST_TIMEOUT_SECS") {
        config.backend.request_timeout =
            Duration::from_secs(parse_env("RELAY_REQUEST_TIMEOUT_SECS", &secs)?);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("RELAY_STREAM_IDLE_TIMEOUT_SECS") {
        config.backend.stream_idle_timeout =
            Duration::from_secs(parse_env("RELAY_STREAM_IDLE_TIMEOUT_SECS", &secs)?);
        config.source = ConfigSource::Env;
    }
    if let Some(addr) = env("RELAY_LISTEN_ADDR") {
        config.listen_addr = parse_addr(&addr)?;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("RELAY_DATABASE_PATH") {
        config.database_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(max) = env("RELAY_MAX_QUESTION_CHARS") {
        config.max_question_chars = parse_env("RELAY_MAX_QUESTION_CHARS", &max)?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("invalid listen address {value:?}: {e}")))
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{key}={value:?}: {e}")))
}
