//! Configuration loading, validation, and management for chatrelay.
//!
//! Loads configuration from a TOML file (default `chatrelay.toml`) with
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `chatrelay.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend (model API) settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Durable store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Streaming pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Custom model pricing overrides (model id -> per-1M rates)
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

/// Backend (model API) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model id used for standard requests
    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    /// Model id used for extended-reasoning requests
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.deepseek.com".into()
}
fn default_primary_model() -> String {
    "deepseek-chat".into()
}
fn default_reasoning_model() -> String {
    "deepseek-reasoner".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            primary_model: default_primary_model(),
            reasoning_model: default_reasoning_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("primary_model", &self.primary_model)
            .field("reasoning_model", &self.reasoning_model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend", &self.backend)
            .field("gateway", &self.gateway)
            .field("store", &self.store)
            .field("pipeline", &self.pipeline)
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// HTTP gateway configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token -> user id. Empty map disables authenticated routes.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8321
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tokens: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tokens", &format!("{} entries", self.tokens.len()))
            .finish()
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `:memory:` for an ephemeral store.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "chatrelay.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Streaming pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Client event buffer depth. Senders block when the client lags
    /// this far behind; events are never dropped.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    /// Number of prior messages replayed into the prompt context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_client_buffer() -> usize {
    64
}
fn default_history_window() -> usize {
    40
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client_buffer: default_client_buffer(),
            history_window: default_history_window(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    pub input_per_m: f64,
    pub output_per_m: f64,
    pub cached_input_per_m: f64,
}

impl AppConfig {
    /// Load configuration from a file path with environment overrides.
    ///
    /// Environment variables (highest priority):
    /// - `CHATRELAY_API_KEY` / `DEEPSEEK_API_KEY` for the backend key
    /// - `CHATRELAY_DB_PATH` for the store path
    /// - `CHATRELAY_PORT` for the gateway port
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.backend.api_key.is_none() {
            config.backend.api_key = std::env::var("CHATRELAY_API_KEY")
                .ok()
                .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok());
        }

        if let Ok(db_path) = std::env::var("CHATRELAY_DB_PATH") {
            config.store.db_path = db_path;
        }

        if let Ok(port) = std::env::var("CHATRELAY_PORT") {
            config.gateway.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError("CHATRELAY_PORT must be a port number".into()))?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.temperature < 0.0 || self.backend.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.pipeline.client_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.client_buffer must be at least 1".into(),
            ));
        }

        if self.backend.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "backend.max_tokens must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if a backend API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            pricing: HashMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
