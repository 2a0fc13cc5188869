//! Collection passes over the configured subreddits
//!
//! Each pass walks the subreddits one at a time:
//! resolve id -> load stored ids -> fetch -> normalize + batch write.
//! A failure in any step ends only that subreddit; the next one still runs and
//! the run totals only count rows that were actually inserted.
//!
//! Subreddits are never created here: [`Pipeline::register_forums`] is a
//! separate pass that must have run before collection.

use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::{IngestError, Result};
use crate::fetcher::Fetcher;
use crate::normalize::{normalize_comment, normalize_post, CommentRow, PostRow};
use crate::source::{ListingSource, Strategy, TimeWindow};
use crate::writer::BatchWriter;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub post_limit: Option<u32>,
    pub time_window: TimeWindow,
    pub batch_size: usize,
    pub max_continuations: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            post_limit: None,
            time_window: TimeWindow::All,
            batch_size: 25,
            max_continuations: 32,
        }
    }
}

impl From<&crate::config::IngestConfig> for PipelineSettings {
    fn from(config: &crate::config::IngestConfig) -> Self {
        Self {
            post_limit: config.post_limit,
            time_window: config.time_window,
            batch_size: config.batch_size,
            max_continuations: config.max_continuations,
        }
    }
}

/// What happened to one subreddit in a pass
#[derive(Debug)]
pub enum ForumOutcome {
    Completed(ForumStats),
    /// Nothing to do; not an error
    Skipped(String),
    Failed(IngestError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForumStats {
    /// Entities fetched from the API (posts, or comments)
    pub fetched: usize,
    /// Entities not already stored that were handed to the writer
    pub submitted: usize,
    pub inserted: usize,
    /// Listings (post pass) or posts (comment pass) whose fetch failed
    pub fetch_failures: usize,
    /// Raw records rejected by the normalizer
    pub invalid_records: usize,
    pub failed_flushes: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub forums: Vec<(String, ForumOutcome)>,
}

impl RunSummary {
    pub fn total_inserted(&self) -> usize {
        self.forums
            .iter()
            .map(|(_, outcome)| match outcome {
                ForumOutcome::Completed(stats) => stats.inserted,
                _ => 0,
            })
            .sum()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ForumOutcome::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ForumOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ForumOutcome::Failed(_)))
    }

    pub fn outcome(&self, forum: &str) -> Option<&ForumOutcome> {
        self.forums.iter().find(|(name, _)| name == forum).map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&ForumOutcome) -> bool) -> usize {
        self.forums.iter().filter(|(_, o)| pred(o)).count()
    }
}

pub struct Pipeline<'a, S: ListingSource + ?Sized> {
    source: &'a S,
    db: &'a Database,
    settings: PipelineSettings,
}

impl<'a, S: ListingSource + ?Sized> Pipeline<'a, S> {
    pub fn new(source: &'a S, db: &'a Database, settings: PipelineSettings) -> Self {
        Self { source, db, settings }
    }

    fn fetcher(&self) -> Fetcher<'a, S> {
        Fetcher::new(self.source, self.settings.max_continuations)
    }

    /// Collect new posts for every subreddit.
    pub async fn run_posts(&self, forums: &[String]) -> RunSummary {
        let mut summary = RunSummary::default();

        for forum in forums {
            info!(forum = %forum, "--- Starting post collection ---");
            let outcome = match self.collect_posts(forum).await {
                Ok(outcome) => outcome,
                Err(e) => ForumOutcome::Failed(e),
            };
            log_outcome(forum, &outcome);
            summary.forums.push((forum.clone(), outcome));
        }

        info!(
            completed = summary.completed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "--- FINISHED --- Total new posts inserted across all subreddits: {}",
            summary.total_inserted()
        );
        summary
    }

    /// Collect comments for every stored post that has none yet.
    pub async fn run_comments(&self, forums: &[String]) -> RunSummary {
        let mut summary = RunSummary::default();

        for forum in forums {
            info!(forum = %forum, "--- Starting comment collection ---");
            let outcome = match self.collect_comments(forum).await {
                Ok(outcome) => outcome,
                Err(e) => ForumOutcome::Failed(e),
            };
            log_outcome(forum, &outcome);
            summary.forums.push((forum.clone(), outcome));
        }

        info!(
            completed = summary.completed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "--- FINISHED --- Total new comments inserted across all subreddits: {}",
            summary.total_inserted()
        );
        summary
    }

    async fn collect_posts(&self, forum: &str) -> Result<ForumOutcome> {
        let subreddit_id = self.db.subreddit_id(forum)?;
        let existing = self.db.existing_post_ids(subreddit_id)?;

        let strategies = Strategy::diverse(self.settings.time_window);
        let mut fetched = self
            .fetcher()
            .fetch_posts(forum, &strategies, self.settings.post_limit)
            .await;

        // A non-remote error (rejected credentials) or every listing failing
        // means nothing was learned about this subreddit.
        let fatal = fetched.failed.iter().position(|(_, e)| !e.is_remote());
        let all_failed = !fetched.failed.is_empty() && fetched.failed.len() == strategies.len();
        if let Some(index) = fatal.or(all_failed.then_some(0)) {
            let (_, e) = fetched.failed.swap_remove(index);
            return Err(e);
        }

        let mut stats = ForumStats {
            fetched: fetched.posts.len(),
            fetch_failures: fetched.failed.len(),
            ..Default::default()
        };

        let new_posts: Vec<_> = fetched
            .posts
            .into_iter()
            .filter(|p| !existing.contains(&p.id))
            .collect();

        if new_posts.is_empty() {
            return Ok(ForumOutcome::Skipped(format!(
                "no new posts ({} fetched, {} already stored)",
                stats.fetched,
                existing.len()
            )));
        }

        let mut writer: BatchWriter<PostRow> = BatchWriter::new(self.db, self.settings.batch_size);
        for raw in new_posts {
            let id = raw.id.clone();
            match normalize_post(raw, subreddit_id, writer.authors_mut()) {
                Ok(row) => {
                    writer.push(row);
                    writer.flush_if_full();
                }
                Err(e) => {
                    warn!(forum, post_id = %id, "Skipping post: {}", e);
                    stats.invalid_records += 1;
                }
            }
        }

        let written = writer.finish();
        stats.submitted = written.submitted;
        stats.inserted = written.inserted;
        stats.failed_flushes = written.failed_flushes;

        Ok(ForumOutcome::Completed(stats))
    }

    async fn collect_comments(&self, forum: &str) -> Result<ForumOutcome> {
        let subreddit_id = self.db.subreddit_id(forum)?;

        let all_posts = self.db.existing_post_ids(subreddit_id)?;
        if all_posts.is_empty() {
            return Ok(ForumOutcome::Skipped("no posts stored".to_string()));
        }

        let processed = self.db.processed_post_ids(subreddit_id)?;
        let work = work_set(&all_posts, &processed);

        info!(
            forum,
            total = all_posts.len(),
            processed = processed.len(),
            "Found stored posts"
        );
        if work.is_empty() {
            return Ok(ForumOutcome::Skipped("no new posts to process".to_string()));
        }
        info!(forum, "Processing comments for {} new posts", work.len());

        let fetcher = self.fetcher();
        let mut writer: BatchWriter<CommentRow> = BatchWriter::new(self.db, self.settings.batch_size);
        let mut stats = ForumStats::default();
        let mut fatal = None;

        for post_id in &work {
            let comments = match fetcher.fetch_comments(post_id).await {
                Ok(comments) => comments,
                Err(e) if !e.is_remote() => {
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    error!(forum, post_id = %post_id, "Could not process comments for post: {}", e);
                    stats.fetch_failures += 1;
                    continue;
                }
            };

            stats.fetched += comments.len();
            for raw in comments {
                let id = raw.id.clone();
                match normalize_comment(raw, post_id, writer.authors_mut()) {
                    Ok(row) => writer.push(row),
                    Err(e) => {
                        warn!(forum, post_id = %post_id, comment_id = %id, "Skipping comment: {}", e);
                        stats.invalid_records += 1;
                    }
                }
            }

            // Flush only between posts so a post's comments land together
            writer.flush_if_full();
        }

        let written = writer.finish();
        if let Some(e) = fatal {
            return Err(e);
        }
        stats.submitted = written.submitted;
        stats.inserted = written.inserted;
        stats.failed_flushes = written.failed_flushes;

        Ok(ForumOutcome::Completed(stats))
    }

    /// Record each subreddit with its current subscriber count. Re-registering
    /// refreshes the count and keeps the id.
    pub async fn register_forums(&self, forums: &[String]) -> Registration {
        let mut registration = Registration::default();

        for forum in forums {
            let result = match self.source.subscriber_count(forum).await {
                Ok(members) => self.db.register_subreddit(forum, members).map(|id| (id, members)),
                Err(e) => Err(e),
            };

            match result {
                Ok((id, members)) => {
                    info!(forum = %forum, subreddit_id = id, ?members, "Registered r/{}", forum);
                    registration.registered.push((forum.clone(), members));
                }
                Err(e) => {
                    error!(forum = %forum, "Skipping subreddit r/{}: {}", forum, e);
                    registration.failed.push((forum.clone(), e));
                }
            }
        }

        info!(
            registered = registration.registered.len(),
            failed = registration.failed.len(),
            "--- FINISHED --- Subreddit registration"
        );
        registration
    }
}

/// Subreddits registered (with subscriber counts) and those that failed
#[derive(Debug, Default)]
pub struct Registration {
    pub registered: Vec<(String, Option<i64>)>,
    pub failed: Vec<(String, IngestError)>,
}

/// Candidates not yet processed, sorted for a stable processing order.
pub fn work_set(candidates: &HashSet<String>, processed: &HashSet<String>) -> Vec<String> {
    let mut work: Vec<String> = candidates.difference(processed).cloned().collect();
    work.sort();
    work
}

fn log_outcome(forum: &str, outcome: &ForumOutcome) {
    match outcome {
        ForumOutcome::Completed(stats) => info!(
            forum,
            fetched = stats.fetched,
            submitted = stats.submitted,
            inserted = stats.inserted,
            fetch_failures = stats.fetch_failures,
            "Completed r/{}",
            forum
        ),
        ForumOutcome::Skipped(reason) => warn!(forum, "Skipping r/{}: {}", forum, reason),
        ForumOutcome::Failed(e) => error!(forum, "An error occurred while processing r/{}: {}", forum, e),
    }
}
