//! Database operations for SQLite storage
//!
//! Every write is "insert, do nothing on conflict" keyed by the upstream id, so
//! re-running a collection over data that is already stored changes nothing.

use rusqlite::{named_params, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::normalize::{AuthorBatch, CommentRow, PostRow};

/// Database handle for SQLite operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create new database connection
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Registered subreddits; rows are created outside the ingestion pipeline
            CREATE TABLE IF NOT EXISTS subreddits (
                subreddit_id INTEGER PRIMARY KEY AUTOINCREMENT,
                subreddit TEXT NOT NULL UNIQUE,
                member_count INTEGER,
                member_count_date TEXT,
                collection_date TEXT
            );

            -- First-seen display name wins; never overwritten
            CREATE TABLE IF NOT EXISTS authors (
                author_fullname TEXT PRIMARY KEY,
                author_name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                post_id TEXT PRIMARY KEY,
                subreddit_id INTEGER NOT NULL REFERENCES subreddits(subreddit_id),
                author_fullname TEXT REFERENCES authors(author_fullname),  -- NULL = deleted
                title TEXT NOT NULL,
                selftext TEXT,
                url TEXT,
                flair TEXT,
                created_utc TEXT NOT NULL,
                score INTEGER,
                num_comments INTEGER,
                upvote_ratio REAL,
                stickied BOOLEAN DEFAULT FALSE
            );

            CREATE INDEX IF NOT EXISTS idx_posts_subreddit ON posts(subreddit_id);

            CREATE TABLE IF NOT EXISTS comments (
                comment_id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL REFERENCES posts(post_id),
                author_fullname TEXT REFERENCES authors(author_fullname),
                parent_id TEXT,
                body TEXT,
                created_utc TEXT NOT NULL,
                score INTEGER,
                depth INTEGER,
                is_submitter BOOLEAN DEFAULT FALSE,
                stickied BOOLEAN DEFAULT FALSE
            );

            CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

            -- Downstream per-comment annotations
            CREATE TABLE IF NOT EXISTS cleaned_comments (
                comment_id TEXT PRIMARY KEY REFERENCES comments(comment_id),
                cleaned_body TEXT,
                word_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS sentiment_analysis (
                analysis_id INTEGER PRIMARY KEY AUTOINCREMENT,
                comment_id TEXT NOT NULL UNIQUE REFERENCES comments(comment_id),
                vader_compound REAL,
                vader_positive REAL,
                vader_negative REAL,
                vader_neutral REAL
            );
            "#,
        )?;

        Ok(())
    }

    /// Register (or refresh the member count of) a subreddit. Seeding only;
    /// the collection passes never create subreddits.
    pub fn register_subreddit(&self, name: &str, member_count: Option<i64>) -> Result<i64> {
        let now = chrono::Utc::now();
        self.conn.execute(
            "INSERT INTO subreddits (subreddit, member_count, member_count_date, collection_date)
             VALUES (:subreddit, :member_count, :now, :now)
             ON CONFLICT(subreddit) DO UPDATE SET
                member_count = excluded.member_count,
                member_count_date = excluded.member_count_date,
                collection_date = excluded.collection_date",
            named_params! {
                ":subreddit": name,
                ":member_count": member_count,
                ":now": now,
            },
        )?;
        self.subreddit_id(name)
    }

    /// Resolve a subreddit name to its stored id
    pub fn subreddit_id(&self, name: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT subreddit_id FROM subreddits WHERE subreddit = :subreddit",
                named_params! { ":subreddit": name },
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| IngestError::SubredditNotFound(name.to_string()))
    }

    /// All post ids already stored for a subreddit
    pub fn existing_post_ids(&self, subreddit_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT post_id FROM posts WHERE subreddit_id = :subreddit_id")?;
        let ids = stmt
            .query_map(named_params! { ":subreddit_id": subreddit_id }, |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    /// Post ids of a subreddit that already have at least one stored comment
    pub fn processed_post_ids(&self, subreddit_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT p.post_id
             FROM posts p
             JOIN comments c ON p.post_id = c.post_id
             WHERE p.subreddit_id = :subreddit_id",
        )?;
        let ids = stmt
            .query_map(named_params! { ":subreddit_id": subreddit_id }, |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    /// Write one batch in a single transaction: authors first, then the rows
    /// that reference them. Returns the number of dependent rows inserted.
    pub fn write_batch<R: DependentRow>(&self, authors: &AuthorBatch, rows: &[R]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        insert_authors(&tx, authors)?;
        let inserted = R::insert_all(&tx, rows)?;
        tx.commit()?;

        Ok(inserted)
    }

    /// Comments that have no `cleaned_comments` row yet
    pub fn uncleaned_comments(&self, limit: usize) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.comment_id, COALESCE(c.body, '')
             FROM comments AS c
             LEFT JOIN cleaned_comments AS cc ON c.comment_id = cc.comment_id
             WHERE cc.comment_id IS NULL
             ORDER BY c.comment_id
             LIMIT :limit",
        )?;
        let rows = stmt
            .query_map(named_params! { ":limit": limit as i64 }, |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert cleaned comment annotations, skipping ids that already have one
    pub fn insert_cleaned_comments(&self, rows: &[CleanedComment]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cleaned_comments (comment_id, cleaned_body, word_count)
                 VALUES (:comment_id, :cleaned_body, :word_count)
                 ON CONFLICT(comment_id) DO NOTHING",
            )?;
            for row in rows {
                inserted += stmt.execute(named_params! {
                    ":comment_id": row.comment_id,
                    ":cleaned_body": row.cleaned_body,
                    ":word_count": row.word_count as i64,
                })?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Row counts per table
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };

        Ok(StorageStats {
            subreddits: count("SELECT COUNT(*) FROM subreddits")?,
            authors: count("SELECT COUNT(*) FROM authors")?,
            posts: count("SELECT COUNT(*) FROM posts")?,
            comments: count("SELECT COUNT(*) FROM comments")?,
            cleaned_comments: count("SELECT COUNT(*) FROM cleaned_comments")?,
            sentiment_rows: count("SELECT COUNT(*) FROM sentiment_analysis")?,
        })
    }
}

fn insert_authors(tx: &Transaction<'_>, authors: &AuthorBatch) -> rusqlite::Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO authors (author_fullname, author_name)
         VALUES (:fullname, :name)
         ON CONFLICT(author_fullname) DO NOTHING",
    )?;

    let mut inserted = 0;
    for (fullname, name) in authors.iter() {
        inserted += stmt.execute(named_params! { ":fullname": fullname, ":name": name })?;
    }
    Ok(inserted)
}

/// A row type that references `authors` and is written after them.
pub trait DependentRow {
    /// Insert all rows, skipping ids that already exist. Returns rows inserted.
    fn insert_all(tx: &Transaction<'_>, rows: &[Self]) -> rusqlite::Result<usize>
    where
        Self: Sized;
}

impl DependentRow for PostRow {
    fn insert_all(tx: &Transaction<'_>, rows: &[Self]) -> rusqlite::Result<usize> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO posts (
                post_id, subreddit_id, author_fullname, title, selftext, url,
                flair, created_utc, score, num_comments, upvote_ratio, stickied
            ) VALUES (
                :post_id, :subreddit_id, :author_fullname, :title, :selftext, :url,
                :flair, :created_utc, :score, :num_comments, :upvote_ratio, :stickied
            )
            ON CONFLICT(post_id) DO NOTHING
            "#,
        )?;

        let mut inserted = 0;
        for post in rows {
            inserted += stmt.execute(named_params! {
                ":post_id": post.post_id,
                ":subreddit_id": post.subreddit_id,
                ":author_fullname": post.author_fullname,
                ":title": post.title,
                ":selftext": post.selftext,
                ":url": post.url,
                ":flair": post.flair,
                ":created_utc": post.created_utc,
                ":score": post.score,
                ":num_comments": post.num_comments,
                ":upvote_ratio": post.upvote_ratio,
                ":stickied": post.stickied,
            })?;
        }
        Ok(inserted)
    }
}

impl DependentRow for CommentRow {
    fn insert_all(tx: &Transaction<'_>, rows: &[Self]) -> rusqlite::Result<usize> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO comments (
                comment_id, post_id, author_fullname, parent_id, body,
                created_utc, score, depth, is_submitter, stickied
            ) VALUES (
                :comment_id, :post_id, :author_fullname, :parent_id, :body,
                :created_utc, :score, :depth, :is_submitter, :stickied
            )
            ON CONFLICT(comment_id) DO NOTHING
            "#,
        )?;

        let mut inserted = 0;
        for comment in rows {
            inserted += stmt.execute(named_params! {
                ":comment_id": comment.comment_id,
                ":post_id": comment.post_id,
                ":author_fullname": comment.author_fullname,
                ":parent_id": comment.parent_id,
                ":body": comment.body,
                ":created_utc": comment.created_utc,
                ":score": comment.score,
                ":depth": comment.depth,
                ":is_submitter": comment.is_submitter,
                ":stickied": comment.stickied,
            })?;
        }
        Ok(inserted)
    }
}

/// Derived annotation row for `cleaned_comments`
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedComment {
    pub comment_id: String,
    pub cleaned_body: String,
    pub word_count: usize,
}

/// Table row counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub subreddits: i64,
    pub authors: i64,
    pub posts: i64,
    pub comments: i64,
    pub cleaned_comments: i64,
    pub sentiment_rows: i64,
}

impl StorageStats {
    pub fn print_report(&self) {
        println!("\nStorage statistics:");
        println!("  Subreddits:        {}", self.subreddits);
        println!("  Authors:           {}", self.authors);
        println!("  Posts:             {}", self.posts);
        println!("  Comments:          {}", self.comments);
        println!("  Cleaned comments:  {}", self.cleaned_comments);
        println!("  Sentiment rows:    {}", self.sentiment_rows);
    }
}
