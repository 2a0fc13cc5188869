//! Reddit Ingest Library
//!
//! Incremental collection of subreddit posts and comments into SQLite.

pub mod annotate;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod pipeline;
pub mod reddit;
pub mod source;
pub mod writer;

pub use config::Config;
pub use db::Database;
pub use error::{IngestError, Result};
pub use pipeline::{ForumOutcome, Pipeline, PipelineSettings, RunSummary};
pub use reddit::RedditClient;
pub use source::ListingSource;
