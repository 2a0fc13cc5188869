//! Error taxonomy for the ingestion pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or invalid settings / credentials. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The subreddit has not been registered in the store.
    #[error("subreddit r/{0} not found in the database")]
    SubredditNotFound(String),

    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl IngestError {
    /// True for failures of a single remote call (network, auth, rate limit,
    /// unexpected payload).
    pub fn is_remote(&self) -> bool {
        matches!(self, IngestError::RemoteApi(_) | IngestError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
