//! Raw record -> persisted row conversion

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{IngestError, Result};
use crate::source::{AuthorRef, RawComment, RawPost};

/// Authors seen since the last flush, keyed by fullname.
///
/// Many comments share an author; a repeated fullname just overwrites the
/// display name (last value wins within a batch).
#[derive(Debug, Default, Clone)]
pub struct AuthorBatch {
    authors: HashMap<String, String>,
}

impl AuthorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, author: &AuthorRef) {
        self.authors.insert(author.fullname.clone(), author.name.clone());
    }

    pub fn get(&self, fullname: &str) -> Option<&str> {
        self.authors.get(fullname).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.authors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.authors.clear();
    }
}

/// Row shape of the `posts` table
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub post_id: String,
    pub subreddit_id: i64,
    /// `None` for deleted authors
    pub author_fullname: Option<String>,
    pub title: String,
    pub selftext: String,
    pub url: String,
    pub flair: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub stickied: bool,
}

/// Row shape of the `comments` table
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub comment_id: String,
    pub post_id: String,
    pub author_fullname: Option<String>,
    pub parent_id: String,
    pub body: String,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub depth: i64,
    pub is_submitter: bool,
    pub stickied: bool,
}

/// Convert upstream epoch seconds (possibly fractional) to a UTC timestamp.
pub fn utc_from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    // floor keeps the fractional part non-negative for pre-1970 values
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

fn timestamp(id: &str, secs: f64) -> Result<DateTime<Utc>> {
    utc_from_epoch(secs).ok_or_else(|| IngestError::InvalidRecord {
        id: id.to_string(),
        reason: format!("created_utc {} out of range", secs),
    })
}

fn author_fullname(author: Option<&AuthorRef>, authors: &mut AuthorBatch) -> Option<String> {
    author.map(|a| {
        authors.record(a);
        a.fullname.clone()
    })
}

pub fn normalize_post(raw: RawPost, subreddit_id: i64, authors: &mut AuthorBatch) -> Result<PostRow> {
    let created_utc = timestamp(&raw.id, raw.created_utc)?;
    let author_fullname = author_fullname(raw.author.as_ref(), authors);

    Ok(PostRow {
        post_id: raw.id,
        subreddit_id,
        author_fullname,
        title: raw.title,
        selftext: raw.selftext,
        url: raw.url,
        flair: raw.flair,
        created_utc,
        score: raw.score,
        num_comments: raw.num_comments,
        upvote_ratio: raw.upvote_ratio,
        stickied: raw.stickied,
    })
}

pub fn normalize_comment(raw: RawComment, post_id: &str, authors: &mut AuthorBatch) -> Result<CommentRow> {
    let created_utc = timestamp(&raw.id, raw.created_utc)?;
    let author_fullname = author_fullname(raw.author.as_ref(), authors);

    Ok(CommentRow {
        comment_id: raw.id,
        post_id: post_id.to_string(),
        author_fullname,
        parent_id: raw.parent_id,
        body: raw.body,
        created_utc,
        score: raw.score,
        depth: raw.depth,
        is_submitter: raw.is_submitter,
        stickied: raw.stickied,
    })
}
