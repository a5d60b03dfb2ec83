use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Upstream API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL without the versioned path, e.g. `https://api.openai.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Fallback API key used when the client did not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Client-visible alias -> upstream model name.
    #[serde(default)]
    pub model_aliases: FxHashMap<String, String>,
    /// Strip sampling parameters the upstream model does not accept and
    /// rename `max_tokens` to `max_completion_tokens`.
    #[serde(default = "default_true")]
    pub sanitize_payload: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            default_model: default_model(),
            model_aliases: FxHashMap::default(),
            sanitize_payload: default_true(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-5".to_string()
}
fn default_true() -> bool {
    true
}

/// Retry and backoff configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total upstream attempts per logical call, first try included.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_seconds")]
    pub base_seconds: f64,
    #[serde(default = "default_retry_max_seconds")]
    pub max_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_seconds: default_retry_base_seconds(),
            max_seconds: default_retry_max_seconds(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_seconds() -> f64 {
    1.5
}
fn default_retry_max_seconds() -> f64 {
    20.0
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Characters of response text retained in a single audit record before
    /// truncation.
    #[serde(default = "default_max_log_text")]
    pub max_log_text: usize,
    /// Emit one JSON object per log line instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_text: default_max_log_text(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_max_log_text() -> usize {
    2_000_000
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load and validate configuration from a YAML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed, or fails
/// validation.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.upstream.base_url.is_empty() {
        return Err(ConfigError::Validation(
            "upstream.base_url must not be empty".to_string(),
        ));
    }
    if !config.upstream.base_url.starts_with("http://")
        && !config.upstream.base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must start with http:// or https://, got '{}'",
            config.upstream.base_url
        )));
    }
    if config.retry.base_seconds <= 0.0 {
        return Err(ConfigError::Validation(
            "retry.base_seconds must be positive".to_string(),
        ));
    }
    if config.retry.max_seconds < config.retry.base_seconds {
        return Err(ConfigError::Validation(
            "retry.max_seconds must be >= retry.base_seconds".to_string(),
        ));
    }
    Ok(())
}
