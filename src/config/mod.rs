pub mod validation;

use serde::Deserialize;
use std::fmt;

use self::validation::validate_config;

/// Environment variable holding the upstream API key.
pub const API_KEY_ENV: &str = "DIFY_API_KEY";
/// Environment variable overriding the upstream base URL.
pub const BASE_URL_ENV: &str = "DIFY_BASE_URL";
/// Environment variable overriding `features.log_level`.
pub const LOG_LEVEL_ENV: &str = "CHAT_RELAY_LOG_LEVEL";
/// Environment variable selecting the config file path.
pub const CONFIG_PATH_ENV: &str = "CHAT_RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

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

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    /// Timeout in seconds for non-streaming upstream calls. Streaming chat
    /// requests never time out on the client side.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default)]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
        }
    }
}

/// Conversational-AI backend configuration.
#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_base_url() -> String {
    "https://api.dify.ai/v1".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// External background-removal service.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_segmentation_timeout")]
    pub timeout: u64,
    /// Largest accepted upload on `/api/remove-background`, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_segmentation_timeout() -> u64 {
    120
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: default_segmentation_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Apply environment overrides on top of file values. Empty variables are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(api_key) = non_empty(API_KEY_ENV) {
            self.upstream.api_key = api_key;
        }
        if let Some(base_url) = non_empty(BASE_URL_ENV) {
            self.upstream.base_url = base_url;
        }
        if let Some(log_level) = non_empty(LOG_LEVEL_ENV) {
            self.features.log_level = log_level;
        }
    }
}

/// Resolve the config file path from the environment.
#[must_use]
pub fn config_path_from_env() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration from a YAML file, apply process environment overrides and validate.
///
/// A missing file is not an error: defaults plus environment overrides are used.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails
/// (including a missing upstream API key).
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    load_config_from_str(&contents, |name| std::env::var(name).ok())
}

/// Parse, override and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn load_config_from_str<F>(contents: &str, env_lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = if contents.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    config.apply_env_overrides(env_lookup);
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_example_config() {
        let contents = std::fs::read_to_string("config.example.yaml").expect("example config");
        let config = load_config_from_str(&contents, no_env);
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.timeout, 180);
        assert!(!config.server.http_use_env_proxy);
        assert!(config.upstream.base_url.starts_with("https://"));
        assert_eq!(config.features.log_format, LogFormat::Text);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = load_config_from_str("", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let yaml = "upstream:\n  base_url: https://file.example/v1\n  api_key: from-file\n";
        let config = load_config_from_str(yaml, |name| match name {
            API_KEY_ENV => Some("from-env".to_string()),
            BASE_URL_ENV => Some("http://env.example/v1".to_string()),
            _ => None,
        })
        .expect("valid config");
        assert_eq!(config.upstream.api_key, "from-env");
        assert_eq!(config.upstream.base_url, "http://env.example/v1");
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let yaml = "upstream:\n  api_key: from-file\n";
        let config = load_config_from_str(yaml, |name| {
            (name == API_KEY_ENV).then(|| "  ".to_string())
        })
        .expect("valid config");
        assert_eq!(config.upstream.api_key, "from-file");
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default().to_string(), "text");
    }

    #[test]
    fn test_upstream_debug_redacts_api_key() {
        let upstream = UpstreamConfig {
            base_url: "https://api.dify.ai/v1".to_string(),
            api_key: "app-secret".to_string(),
        };
        let rendered = format!("{upstream:?}");
        assert!(!rendered.contains("app-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_server_config_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.connect_timeout, 10);
        assert_eq!(server.runtime_worker_threads, None);
    }
}
