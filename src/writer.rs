//! Batched, conflict-tolerant writes of normalized rows

use tracing::{debug, error};

use crate::db::{Database, DependentRow};
use crate::normalize::AuthorBatch;

/// Outcome of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Rows handed to the store
    pub submitted: usize,
    /// Rows actually inserted (ids already stored are skipped)
    pub inserted: usize,
    /// The transaction failed and was rolled back
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub flushes: usize,
    pub submitted: usize,
    pub inserted: usize,
    pub failed_flushes: usize,
}

/// Accumulates rows plus the authors they reference and writes them in
/// fixed-size batches, authors first.
pub struct BatchWriter<'a, R: DependentRow> {
    db: &'a Database,
    batch_size: usize,
    rows: Vec<R>,
    authors: AuthorBatch,
    stats: WriterStats,
}

impl<'a, R: DependentRow> BatchWriter<'a, R> {
    pub fn new(db: &'a Database, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            db,
            batch_size,
            rows: Vec::with_capacity(batch_size),
            authors: AuthorBatch::new(),
            stats: WriterStats::default(),
        }
    }

    /// Author accumulator for the normalizer to record into
    pub fn authors_mut(&mut self) -> &mut AuthorBatch {
        &mut self.authors
    }

    pub fn push(&mut self, row: R) {
        self.rows.push(row);
    }

    pub fn pending(&self) -> usize {
        self.rows.len()
    }

    /// Flush once the batch threshold is reached.
    pub fn flush_if_full(&mut self) -> Option<FlushReport> {
        if self.rows.len() >= self.batch_size {
            self.flush()
        } else {
            None
        }
    }

    /// Write everything pending. A batch with no rows writes nothing, not even
    /// its authors.
    pub fn flush(&mut self) -> Option<FlushReport> {
        if self.rows.is_empty() {
            self.authors.clear();
            return None;
        }

        let submitted = self.rows.len();
        let report = match self.db.write_batch(&self.authors, &self.rows) {
            Ok(inserted) => {
                debug!(
                    submitted,
                    inserted,
                    authors = self.authors.len(),
                    "Flushed batch"
                );
                FlushReport {
                    submitted,
                    inserted,
                    failed: false,
                }
            }
            Err(e) => {
                error!(submitted, "Batch write failed, rolled back: {}", e);
                FlushReport {
                    submitted,
                    inserted: 0,
                    failed: true,
                }
            }
        };

        self.rows.clear();
        self.authors.clear();

        self.stats.flushes += 1;
        self.stats.submitted += report.submitted;
        self.stats.inserted += report.inserted;
        if report.failed {
            self.stats.failed_flushes += 1;
        }

        Some(report)
    }

    /// Flush the remainder and return totals.
    pub fn finish(mut self) -> WriterStats {
        self.flush();
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_post, PostRow};
    use crate::source::{AuthorRef, RawPost};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().unwrap();
        let sid = db.register_subreddit("example", None).unwrap();
        (db, sid)
    }

    fn raw_post(i: usize) -> RawPost {
        RawPost {
            id: format!("p{}", i),
            author: Some(AuthorRef {
                fullname: format!("t2_{}", i % 7),
                name: format!("user{}", i % 7),
            }),
            title: format!("post {}", i),
            selftext: String::new(),
            url: String::new(),
            flair: None,
            created_utc: 1_700_000_000.0 + i as f64,
            score: i as i64,
            num_comments: 0,
            upvote_ratio: 1.0,
            stickied: false,
        }
    }

    #[test]
    fn test_flush_boundaries() {
        let (db, sid) = setup();
        let mut writer: BatchWriter<PostRow> = BatchWriter::new(&db, 25);
        let mut reports = Vec::new();

        for i in 0..60 {
            let row = normalize_post(raw_post(i), sid, writer.authors_mut()).unwrap();
            writer.push(row);
            if let Some(report) = writer.flush_if_full() {
                reports.push(report);
            }
        }
        assert_eq!(writer.pending(), 10);
        if let Some(report) = writer.flush() {
            reports.push(report);
        }

        let sizes: Vec<_> = reports.iter().map(|r| r.submitted).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        assert!(reports.iter().all(|r| !r.failed && r.inserted == r.submitted));

        // Posts reference authors through a foreign key, so every flush having
        // succeeded means authors landed before their posts.
        let stats = db.storage_stats().unwrap();
        assert_eq!(stats.posts, 60);
        assert_eq!(stats.authors, 7);
    }

    #[test]
    fn test_finish_totals() {
        let (db, sid) = setup();
        let mut writer: BatchWriter<PostRow> = BatchWriter::new(&db, 25);
        for i in 0..30 {
            let row = normalize_post(raw_post(i), sid, writer.authors_mut()).unwrap();
            writer.push(row);
            writer.flush_if_full();
        }

        let stats = writer.finish();
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.submitted, 30);
        assert_eq!(stats.inserted, 30);
        assert_eq!(stats.failed_flushes, 0);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let (db, _) = setup();
        let mut writer: BatchWriter<PostRow> = BatchWriter::new(&db, 25);
        writer.authors_mut().record(&AuthorRef {
            fullname: "t2_orphan".into(),
            name: "orphan".into(),
        });

        assert!(writer.flush().is_none());
        assert_eq!(writer.finish().flushes, 0);
        assert_eq!(db.storage_stats().unwrap().authors, 0);
    }

    #[test]
    fn test_failed_flush_reports_zero() {
        let (db, _) = setup();
        let mut writer: BatchWriter<PostRow> = BatchWriter::new(&db, 25);

        // Unknown subreddit id violates the foreign key
        let row = normalize_post(raw_post(1), 404, writer.authors_mut()).unwrap();
        writer.push(row);

        let report = writer.flush().unwrap();
        assert!(report.failed);
        assert_eq!(report.inserted, 0);
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.finish().failed_flushes, 1);
    }
}
