#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use reddit_ingest::source::{
    AuthorRef, CommentNode, CommentTree, Continuation, ListingSource, RawComment, RawPost, Strategy,
};
use reddit_ingest::{Database, IngestError, Result};

/// In-memory listing source with scripted failures.
#[derive(Default)]
pub struct FakeSource {
    /// Posts per strategy name ("top", "hot", ...)
    pub listings: HashMap<&'static str, Vec<RawPost>>,
    pub failing_strategies: HashSet<&'static str>,
    pub trees: HashMap<String, Vec<CommentNode>>,
    pub failing_posts: HashSet<String>,
    pub tree_calls: Mutex<Vec<String>>,
    pub subscribers: HashMap<String, i64>,
    pub failing_forums: HashSet<String>,
    /// Every call fails the way a revoked app secret does
    pub reject_credentials: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_credentials(&self) -> Result<()> {
        if self.reject_credentials {
            return Err(IngestError::Configuration("Reddit rejected the client credentials (401 Unauthorized)".into()));
        }
        Ok(())
    }

    pub fn tree_calls(&self) -> Vec<String> {
        let mut calls = self.tree_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    async fn list_posts(&self, _forum: &str, strategy: Strategy, limit: Option<u32>) -> Result<Vec<RawPost>> {
        self.check_credentials()?;
        if self.failing_strategies.contains(strategy.name()) {
            return Err(IngestError::RemoteApi(format!("{} timed out", strategy)));
        }
        let mut posts = self.listings.get(strategy.name()).cloned().unwrap_or_default();
        if let Some(limit) = limit {
            posts.truncate(limit as usize);
        }
        Ok(posts)
    }

    async fn comment_tree(&self, post_id: &str) -> Result<CommentTree> {
        self.tree_calls.lock().unwrap().push(post_id.to_string());
        self.check_credentials()?;
        if self.failing_posts.contains(post_id) {
            return Err(IngestError::RemoteApi(format!("post {} was removed", post_id)));
        }
        Ok(CommentTree {
            post_id: post_id.to_string(),
            nodes: self.trees.get(post_id).cloned().unwrap_or_default(),
        })
    }

    async fn expand_continuation(&self, _post_id: &str, _continuation: &Continuation) -> Result<Vec<CommentNode>> {
        Ok(Vec::new())
    }

    async fn subscriber_count(&self, forum: &str) -> Result<Option<i64>> {
        self.check_credentials()?;
        if self.failing_forums.contains(forum) {
            return Err(IngestError::RemoteApi(format!("/r/{}/about not found", forum)));
        }
        Ok(self.subscribers.get(forum).copied())
    }
}

/// Log sink shared between a test and the subscriber writing into it.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Install a plain-text subscriber for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect()
    }

    pub fn errors_containing(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains("ERROR") && line.contains(needle))
            .count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn author(i: usize) -> Option<AuthorRef> {
    Some(AuthorRef {
        fullname: format!("t2_user{}", i),
        name: format!("user{}", i),
    })
}

pub fn raw_post(id: &str, author: Option<AuthorRef>) -> RawPost {
    RawPost {
        id: id.to_string(),
        author,
        title: format!("Post {}", id),
        selftext: "text".to_string(),
        url: format!("https://www.reddit.com/r/example/comments/{}", id),
        flair: None,
        created_utc: 1_700_000_000.0,
        score: 10,
        num_comments: 2,
        upvote_ratio: 0.95,
        stickied: false,
    }
}

pub fn comment_node(id: &str, parent: &str, author: Option<AuthorRef>, replies: Vec<CommentNode>) -> CommentNode {
    CommentNode::Comment {
        comment: RawComment {
            id: id.to_string(),
            author,
            parent_id: parent.to_string(),
            body: format!("comment {}", id),
            created_utc: 1_700_000_500.0,
            score: 1,
            depth: 0,
            is_submitter: false,
            stickied: false,
        },
        replies,
    }
}

pub fn setup_db(forums: &[&str]) -> Database {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().unwrap();
    for forum in forums {
        db.register_subreddit(forum, Some(1000)).unwrap();
    }
    db
}

pub fn forums(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
