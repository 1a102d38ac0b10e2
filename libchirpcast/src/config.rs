//! Configuration management for Chirpcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Values we refuse to treat as real credentials. Shipping demo keys in
/// a sample .env is common; posting with them must surface as
/// `Unconfigured`, not as a mysterious 401.
const PLACEHOLDER_MARKERS: &[&str] = &["demo", "your-", "your_", "changeme", "placeholder", "xxx"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Daily cap on successful sends, shared across all request sources.
    pub daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { daily_limit: 17 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Attempt cap for one-shot submissions.
    pub max_attempts_immediate: u32,
    /// Attempt cap for a single recurring firing.
    pub max_attempts_scheduled: u32,
    /// Base delay for exponential backoff, in seconds.
    pub retry_base_secs: u64,
    /// Timeout applied to every external call.
    pub request_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts_immediate: 5,
            max_attempts_scheduled: 3,
            retry_base_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// API key for the content provider; falls back to OPENAI_API_KEY.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TwitterConfig {
    /// OAuth2 user-context token; falls back to TWITTER_BEARER_TOKEN.
    pub bearer_token: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/chirpcast/chirpcast.db".to_string(),
            },
            quota: QuotaConfig::default(),
            scheduler: SchedulerConfig::default(),
            content: ContentConfig::default(),
            twitter: TwitterConfig::default(),
        }
    }

    /// Resolve the content API key: config value first, then environment.
    pub fn content_api_key(&self) -> Option<String> {
        resolve_credential(self.content.api_key.as_deref(), "OPENAI_API_KEY")
    }

    /// Resolve the posting token: config value first, then environment.
    pub fn twitter_bearer_token(&self) -> Option<String> {
        resolve_credential(self.twitter.bearer_token.as_deref(), "TWITTER_BEARER_TOKEN")
    }
}

fn resolve_credential(configured: Option<&str>, env_var: &str) -> Option<String> {
    let value = match configured {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => std::env::var(env_var).ok()?.trim().to_string(),
    };
    if value.is_empty() || is_placeholder(&value) {
        return None;
    }
    Some(value)
}

/// Detect demo/sample credential values.
pub fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHIRPCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("chirpcast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("chirpcast"))
}
