//! Reddit Ingest
//!
//! Collects posts and comments from the configured subreddits into SQLite.
//!
//! Usage:
//!   reddit-ingest --register   # Register the configured subreddits
//!   reddit-ingest              # Collect new posts
//!   reddit-ingest --comments   # Collect comments for posts that have none
//!   reddit-ingest --clean      # Populate cleaned_comments
//!   reddit-ingest --stats      # Show storage statistics

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reddit_ingest::annotate;
use reddit_ingest::config::{Config, RedditCredentials};
use reddit_ingest::{Database, Pipeline, PipelineSettings, RedditClient};

const DEFAULT_CONFIG: &str = "config/settings.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Register,
    Posts,
    Comments,
    Clean,
    Stats,
}

/// Command-line arguments
struct Args {
    mode: Mode,
    config_path: String,
    /// Overrides the configured post / clean limit
    limit: Option<u32>,
    help: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut result = Args {
            mode: Mode::Posts,
            config_path: DEFAULT_CONFIG.to_string(),
            limit: None,
            help: false,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--register" => result.mode = Mode::Register,
                "--posts" | "-p" => result.mode = Mode::Posts,
                "--comments" | "-c" => result.mode = Mode::Comments,
                "--clean" => result.mode = Mode::Clean,
                "--stats" => result.mode = Mode::Stats,
                "--config" => {
                    i += 1;
                    if i < args.len() {
                        result.config_path = args[i].clone();
                    }
                }
                "--limit" | "-l" => {
                    i += 1;
                    if i < args.len() {
                        result.limit = args[i].parse().ok();
                    }
                }
                "--help" | "-h" => result.help = true,
                _ => {}
            }
            i += 1;
        }

        result
    }

    fn print_help() {
        println!("Reddit Ingest - incremental subreddit post/comment collection\n");
        println!("USAGE:");
        println!("  reddit-ingest [MODE] [OPTIONS]\n");
        println!("MODES:");
        println!("  --register        Register configured subreddits (run once before collecting)");
        println!("  --posts, -p       Collect new posts (default)");
        println!("  --comments, -c    Collect comments for stored posts without any");
        println!("  --clean           Populate cleaned_comments");
        println!("  --stats           Show storage statistics\n");
        println!("OPTIONS:");
        println!("  --config PATH     Settings file (default: {})", DEFAULT_CONFIG);
        println!("  --limit, -l NUM   Per-listing post limit, or comments to clean");
        println!("  --help, -h        Show this help message\n");
        println!("ENVIRONMENT:");
        println!("  REDDIT_CLIENT_ID, REDDIT_CLIENT_SECRET   API credentials (.env is read)");
        println!("  DATABASE_PATH                            Overrides database.sqlite_path");
        println!("  RUST_LOG                                 Log filter (default: info)");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.help {
        Args::print_help();
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let code = match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("A critical error stopped the run: {:#}", e);
            ExitCode::FAILURE
        }
    };

    info!("Finished");
    code
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path))?;
    info!("Loaded configuration from {}", args.config_path);

    let db = Database::new(&config.database.sqlite_path)
        .with_context(|| format!("opening {}", config.database.sqlite_path))?;
    db.run_migrations()?;
    info!("Database initialized");

    match args.mode {
        Mode::Stats => {
            db.storage_stats()?.print_report();
            Ok(())
        }
        Mode::Clean => {
            let limit = args.limit.map(|l| l as usize).unwrap_or(config.ingest.clean_limit);
            let stats = annotate::clean_comments(&db, limit, config.ingest.batch_size)?;
            info!(
                "Cleaning complete: {} selected, {} inserted, {} failed batches",
                stats.selected, stats.inserted, stats.failed_batches
            );
            Ok(())
        }
        Mode::Register | Mode::Posts | Mode::Comments => {
            let credentials = RedditCredentials::from_env()?;
            let client = RedditClient::new(&config.reddit, credentials)?;
            client.authenticate().await?;
            info!("Reddit client initialized");

            let mut settings = PipelineSettings::from(&config.ingest);
            if let Some(limit) = args.limit {
                settings.post_limit = Some(limit);
            }

            let pipeline = Pipeline::new(&client, &db, settings);
            if args.mode == Mode::Register {
                let registration = pipeline.register_forums(&config.ingest.subreddits).await;
                info!(
                    "Registration complete: {} registered, {} failed",
                    registration.registered.len(),
                    registration.failed.len()
                );
                return Ok(());
            }

            let summary = if args.mode == Mode::Posts {
                pipeline.run_posts(&config.ingest.subreddits).await
            } else {
                pipeline.run_comments(&config.ingest.subreddits).await
            };

            info!(
                "Run complete: {} completed, {} skipped, {} failed, {} rows inserted",
                summary.completed(),
                summary.skipped(),
                summary.failed(),
                summary.total_inserted()
            );
            Ok(())
        }
    }
}
