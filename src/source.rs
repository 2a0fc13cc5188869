//! Remote listing source: the capability the pipeline fetches posts and
//! comment trees from, plus the raw record shapes it yields.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::error::Result;

/// Time filter accepted by the `top` and `controversial` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

/// One ordering of a subreddit's posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Top(TimeWindow),
    Hot,
    New,
    Controversial(TimeWindow),
}

impl Strategy {
    /// The listings merged together to get past the per-listing result cap.
    pub fn diverse(window: TimeWindow) -> [Strategy; 4] {
        [
            Strategy::Top(window),
            Strategy::Hot,
            Strategy::New,
            Strategy::Controversial(window),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Top(_) => "top",
            Strategy::Hot => "hot",
            Strategy::New => "new",
            Strategy::Controversial(_) => "controversial",
        }
    }

    pub fn time_window(&self) -> Option<TimeWindow> {
        match self {
            Strategy::Top(w) | Strategy::Controversial(w) => Some(*w),
            Strategy::Hot | Strategy::New => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time_window() {
            Some(w) => write!(f, "{}/{}", self.name(), w.as_str()),
            None => f.write_str(self.name()),
        }
    }
}

/// Author reference as reported upstream. Absent when the account was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorRef {
    /// Stable opaque account id (`t2_...`).
    pub fullname: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RawPost {
    pub id: String,
    pub author: Option<AuthorRef>,
    pub title: String,
    pub selftext: String,
    pub url: String,
    pub flair: Option<String>,
    /// Epoch seconds
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub stickied: bool,
}

#[derive(Debug, Clone)]
pub struct RawComment {
    pub id: String,
    pub author: Option<AuthorRef>,
    /// Fullname of the parent: `t3_...` for top-level comments, `t1_...` otherwise.
    pub parent_id: String,
    pub body: String,
    pub created_utc: f64,
    pub score: i64,
    pub depth: i64,
    pub is_submitter: bool,
    pub stickied: bool,
}

/// Placeholder for comments that were not included in the tree response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub parent_id: String,
    /// Ids of the hidden comments. Empty for "continue this thread" links.
    pub children: Vec<String>,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub enum CommentNode {
    Comment {
        comment: RawComment,
        replies: Vec<CommentNode>,
    },
    More(Continuation),
}

#[derive(Debug, Clone, Default)]
pub struct CommentTree {
    pub post_id: String,
    pub nodes: Vec<CommentNode>,
}

/// Paginated, rate-limited access to a forum's listings and comment trees.
///
/// Every call may fail independently; callers decide how far a failure
/// propagates.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// List posts of `forum` in the given ordering. `limit = None` walks
    /// pages until the upstream cursor runs out.
    async fn list_posts(
        &self,
        forum: &str,
        strategy: Strategy,
        limit: Option<u32>,
    ) -> Result<Vec<RawPost>>;

    /// Fetch the comment tree of a post as returned in one response,
    /// continuation placeholders included.
    async fn comment_tree(&self, post_id: &str) -> Result<CommentTree>;

    /// Resolve one continuation placeholder into the nodes it stands for.
    /// The returned nodes may contain further continuations.
    async fn expand_continuation(
        &self,
        post_id: &str,
        continuation: &Continuation,
    ) -> Result<Vec<CommentNode>>;

    /// Current subscriber count of `forum`, if the upstream reports one.
    async fn subscriber_count(&self, forum: &str) -> Result<Option<i64>>;
}
