//! Configuration loader and validator for the daily digest fetcher.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `api.base_url` after the file is loaded.
pub const BASE_URL_ENV: &str = "DIGEST_API_BASE_URL";

const MAX_SETTLE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Wait between a successful ingestion trigger and the follow-up read.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Whether an empty day may ask the ingestion service to populate it.
    #[serde(default = "default_auto_fetch")]
    pub auto_fetch: bool,
}

/// Remote calendar API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_auto_fetch() -> bool {
    true
}

fn default_namespace() -> String {
    "limitless".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl App {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Api {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env_overrides(&mut cfg, std::env::var(BASE_URL_ENV).ok());
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut Config, base_url: Option<String>) {
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
        cfg.api.base_url = url;
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.settle_delay_ms > MAX_SETTLE_DELAY_MS {
        return Err(ConfigError::Invalid("app.settle_delay_ms must be <= 60000"));
    }

    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    match Url::parse(cfg.api.base_url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(_) => return Err(ConfigError::Invalid("api.base_url must use http or https")),
        Err(_) => return Err(ConfigError::Invalid("api.base_url must be a valid URL")),
    }
    if cfg.api.namespace.trim().is_empty() {
        return Err(ConfigError::Invalid("api.namespace must be non-empty"));
    }
    if cfg.api.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("api.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  settle_delay_ms: 1000
  auto_fetch: true

api:
  base_url: "http://localhost:8000/api/"
  namespace: "limitless"
  timeout_seconds: 30
"#
}
