mod common;

use common::*;
use reddit_ingest::normalize::{normalize_comment, normalize_post, AuthorBatch, CommentRow, PostRow};
use reddit_ingest::pipeline::ForumStats;
use reddit_ingest::{Database, ForumOutcome, IngestError, Pipeline, PipelineSettings};

fn completed(outcome: Option<&ForumOutcome>) -> ForumStats {
    match outcome {
        Some(ForumOutcome::Completed(stats)) => *stats,
        other => panic!("expected a completed forum, got {:?}", other),
    }
}

fn five_posts_source() -> FakeSource {
    let mut source = FakeSource::new();
    source.listings.insert(
        "top",
        vec![raw_post("p1", author(1)), raw_post("p2", author(2)), raw_post("p3", author(1))],
    );
    source.listings.insert("hot", vec![raw_post("p3", author(1)), raw_post("p4", None)]);
    source.listings.insert("new", vec![raw_post("p5", author(3)), raw_post("p1", author(1))]);
    source
}

#[tokio::test]
async fn post_pass_is_idempotent() {
    let db = setup_db(&["example"]);
    let source = five_posts_source();
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let first = pipeline.run_posts(&forums(&["example"])).await;
    assert_eq!(first.total_inserted(), 5);
    let stats = completed(first.outcome("example"));
    assert_eq!(stats.fetched, 5);

    let second = pipeline.run_posts(&forums(&["example"])).await;
    assert_eq!(second.total_inserted(), 0);
    assert!(matches!(second.outcome("example"), Some(ForumOutcome::Skipped(_))));

    let storage = db.storage_stats().unwrap();
    assert_eq!(storage.posts, 5);
    assert_eq!(storage.authors, 3);
}

#[tokio::test]
async fn deleted_author_stored_as_null() {
    let db = setup_db(&["example"]);
    let source = five_posts_source();
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());
    pipeline.run_posts(&forums(&["example"])).await;

    let author: Option<String> = db
        .connection()
        .query_row("SELECT author_fullname FROM posts WHERE post_id = 'p4'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(author, None);
}

#[tokio::test]
async fn failing_listing_does_not_abort_forum() {
    let db = setup_db(&["example"]);
    let mut source = five_posts_source();
    source.failing_strategies.insert("hot");
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let summary = pipeline.run_posts(&forums(&["example"])).await;
    let stats = completed(summary.outcome("example"));

    // p4 only appears in "hot"
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.inserted, 4);
}

#[tokio::test]
async fn unknown_forum_is_isolated() {
    let db = setup_db(&["example"]);
    let source = five_posts_source();
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let summary = pipeline.run_posts(&forums(&["missing", "example"])).await;

    assert!(matches!(
        summary.outcome("missing"),
        Some(ForumOutcome::Failed(IngestError::SubredditNotFound(_)))
    ));
    assert_eq!(completed(summary.outcome("example")).inserted, 5);
    assert_eq!(summary.total_inserted(), 5);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.completed(), 1);
}

#[tokio::test]
async fn small_batches_insert_everything() {
    let db = setup_db(&["example"]);
    let source = five_posts_source();
    let settings = PipelineSettings {
        batch_size: 2,
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(&source, &db, settings);

    let summary = pipeline.run_posts(&forums(&["example"])).await;
    assert_eq!(summary.total_inserted(), 5);
    assert_eq!(db.storage_stats().unwrap().posts, 5);
}

#[tokio::test]
async fn end_to_end_comment_pass() {
    let db = setup_db(&["example"]);
    let sid = db.subreddit_id("example").unwrap();

    // Two posts collected by an earlier run, each already with a comment
    let mut authors = AuthorBatch::new();
    let old_posts: Vec<PostRow> = ["p1", "p2"]
        .iter()
        .map(|id| normalize_post(raw_post(id, author(9)), sid, &mut authors).unwrap())
        .collect();
    db.write_batch(&authors, &old_posts).unwrap();

    let mut comment_authors = AuthorBatch::new();
    let old_comments: Vec<CommentRow> = ["p1", "p2"]
        .iter()
        .map(|post_id| {
            let node = comment_node(&format!("old_{}", post_id), &format!("t3_{}", post_id), None, vec![]);
            let raw = match node {
                reddit_ingest::source::CommentNode::Comment { comment, .. } => comment,
                _ => unreachable!(),
            };
            normalize_comment(raw, post_id, &mut comment_authors).unwrap()
        })
        .collect();
    db.write_batch(&comment_authors, &old_comments).unwrap();

    let mut source = five_posts_source();
    source.trees.insert(
        "p3".into(),
        vec![comment_node("c31", "t3_p3", author(4), vec![comment_node("c32", "t1_c31", author(5), vec![])])],
    );
    source.trees.insert("p4".into(), vec![comment_node("c41", "t3_p4", author(4), vec![])]);
    source.trees.insert("p5".into(), vec![comment_node("c51", "t3_p5", None, vec![])]);
    source.failing_posts.insert("p4".into());

    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let posts = pipeline.run_posts(&forums(&["example"])).await;
    assert_eq!(posts.total_inserted(), 3);

    let logs = CapturedLogs::default();
    let comments = {
        let _guard = logs.install();
        pipeline.run_comments(&forums(&["example"])).await
    };
    let stats = completed(comments.outcome("example"));

    let errors: Vec<_> = logs.lines().into_iter().filter(|l| l.contains("ERROR")).collect();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert_eq!(logs.errors_containing("Could not process comments for post"), 1);
    assert!(errors[0].contains("p4"));

    assert_eq!(source.tree_calls(), vec!["p3", "p4", "p5"]);
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.inserted, 3);
    assert_eq!(comments.total_inserted(), 3);

    let storage = db.storage_stats().unwrap();
    assert_eq!(storage.comments, 5);

    // p4 failed and has no comments, so only it is retried
    source.tree_calls.lock().unwrap().clear();
    let rerun = pipeline.run_comments(&forums(&["example"])).await;
    assert_eq!(source.tree_calls(), vec!["p4"]);
    assert_eq!(rerun.total_inserted(), 0);
}

#[tokio::test]
async fn comment_pass_skips_forum_without_posts() {
    let db = setup_db(&["example"]);
    let source = FakeSource::new();
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let summary = pipeline.run_comments(&forums(&["example"])).await;
    assert!(matches!(summary.outcome("example"), Some(ForumOutcome::Skipped(_))));
    assert!(source.tree_calls().is_empty());
}

#[tokio::test]
async fn every_listing_failing_fails_forum() {
    let db = setup_db(&["example"]);
    let mut source = five_posts_source();
    source.failing_strategies.extend(["top", "hot", "new", "controversial"]);
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let summary = pipeline.run_posts(&forums(&["example"])).await;

    assert!(matches!(
        summary.outcome("example"),
        Some(ForumOutcome::Failed(IngestError::RemoteApi(_)))
    ));
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.skipped(), 0);
}

#[tokio::test]
async fn rejected_credentials_fail_both_passes() {
    let db = setup_db(&["example"]);
    let mut source = five_posts_source();
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());
    pipeline.run_posts(&forums(&["example"])).await;

    source.reject_credentials = true;
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let posts = pipeline.run_posts(&forums(&["example"])).await;
    assert!(matches!(
        posts.outcome("example"),
        Some(ForumOutcome::Failed(IngestError::Configuration(_)))
    ));

    // Stops at the first post instead of logging one error per post
    let comments = pipeline.run_comments(&forums(&["example"])).await;
    assert!(matches!(
        comments.outcome("example"),
        Some(ForumOutcome::Failed(IngestError::Configuration(_)))
    ));
    assert_eq!(source.tree_calls().len(), 1);
}

#[tokio::test]
async fn registration_makes_forums_collectable() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().unwrap();

    let mut source = five_posts_source();
    source.subscribers.insert("example".into(), 1200);
    source.failing_forums.insert("gone".into());
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());

    let before = pipeline.run_posts(&forums(&["example"])).await;
    assert!(matches!(
        before.outcome("example"),
        Some(ForumOutcome::Failed(IngestError::SubredditNotFound(_)))
    ));

    let registration = pipeline.register_forums(&forums(&["gone", "example"])).await;
    assert_eq!(registration.registered, vec![("example".to_string(), Some(1200))]);
    assert_eq!(registration.failed.len(), 1);
    assert_eq!(registration.failed[0].0, "gone");

    let members: Option<i64> = db
        .connection()
        .query_row("SELECT member_count FROM subreddits WHERE subreddit = 'example'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(members, Some(1200));
    assert!(db.subreddit_id("gone").is_err());

    let after = pipeline.run_posts(&forums(&["example"])).await;
    assert_eq!(after.total_inserted(), 5);

    // Re-registering refreshes the count and keeps the id
    let sid = db.subreddit_id("example").unwrap();
    source.subscribers.insert("example".into(), 1300);
    let pipeline = Pipeline::new(&source, &db, PipelineSettings::default());
    pipeline.register_forums(&forums(&["example"])).await;
    assert_eq!(db.subreddit_id("example").unwrap(), sid);
}
