//! Configuration loading and management

use serde::Deserialize;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::source::TimeWindow;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            requests_per_minute: default_requests_per_minute(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub subreddits: Vec<String>,
    /// Per-strategy listing limit; absent means "as many as the API returns".
    #[serde(default)]
    pub post_limit: Option<u32>,
    #[serde(default)]
    pub time_window: TimeWindow,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on "load more comments" expansions per post.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
    #[serde(default = "default_clean_limit")]
    pub clean_limit: usize,
}

fn default_user_agent() -> String {
    format!("reddit-ingest/{} (research data collection)", env!("CARGO_PKG_VERSION"))
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_batch_size() -> usize {
    25
}

fn default_max_continuations() -> usize {
    32
}

fn default_clean_limit() -> usize {
    1000
}

impl Config {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;

        if let Ok(db_path) = std::env::var("DATABASE_PATH") {
            if !db_path.is_empty() {
                config.database.sqlite_path = db_path;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            return Err(IngestError::Configuration("ingest.batch_size must be > 0".into()));
        }
        if self.reddit.requests_per_minute == 0 {
            return Err(IngestError::Configuration(
                "reddit.requests_per_minute must be > 0".into(),
            ));
        }
        if self.database.sqlite_path.trim().is_empty() {
            return Err(IngestError::Configuration("database.sqlite_path is empty".into()));
        }
        Ok(())
    }
}

/// Reddit app credentials, read from the environment (or a `.env` file).
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl RedditCredentials {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            client_id: required_env("REDDIT_CLIENT_ID")?,
            client_secret: required_env("REDDIT_CLIENT_SECRET")?,
        })
    }
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn required_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(IngestError::Configuration(format!("{} is not set", key))),
    }
}
