//! Comment text cleaning for the `cleaned_comments` table

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{error, info};

use crate::db::{CleanedComment, Database};
use crate::error::Result;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"http\S+").expect("valid URL regex"));

static NON_ALPHA_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z\s]").expect("valid non-alpha regex"));

// English stopwords
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "youre", "youve",
        "youll", "youd", "your", "yours", "yourself", "yourselves", "he", "him", "his",
        "himself", "she", "shes", "her", "hers", "herself", "it", "its", "itself", "they",
        "them", "their", "theirs", "themselves", "what", "which", "who", "whom", "this",
        "that", "thatll", "these", "those", "am", "is", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
        "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
        "for", "with", "about", "against", "between", "into", "through", "during", "before",
        "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off",
        "over", "under", "again", "further", "then", "once", "here", "there", "when",
        "where", "why", "how", "all", "any", "both", "each", "few", "more", "most", "other",
        "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too",
        "very", "s", "t", "can", "will", "just", "don", "dont", "should", "shouldve", "now",
        "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "arent", "couldn", "couldnt",
        "didn", "didnt", "doesn", "doesnt", "hadn", "hadnt", "hasn", "hasnt", "haven",
        "havent", "isn", "isnt", "ma", "mightn", "mightnt", "mustn", "mustnt", "needn",
        "neednt", "shan", "shant", "shouldn", "shouldnt", "wasn", "wasnt", "weren",
        "werent", "won", "wont", "wouldn", "wouldnt",
    ]
    .into_iter()
    .collect()
});

/// Strip URLs and non-letters, lowercase, drop stopwords.
/// Returns the cleaned text and its word count.
pub fn clean_text(text: &str) -> (String, usize) {
    let text = URL_PATTERN.replace_all(text, "");
    let text = NON_ALPHA_PATTERN.replace_all(&text, "").to_lowercase();

    let tokens: Vec<&str> = text
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(*word))
        .collect();

    (tokens.join(" "), tokens.len())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanStats {
    pub selected: usize,
    pub inserted: usize,
    pub failed_batches: usize,
}

/// Clean up to `limit` comments that have no cleaned row yet, writing in
/// batches of `batch_size`.
pub fn clean_comments(db: &Database, limit: usize, batch_size: usize) -> Result<CleanStats> {
    let pending = db.uncleaned_comments(limit)?;
    let mut stats = CleanStats {
        selected: pending.len(),
        ..Default::default()
    };

    if pending.is_empty() {
        info!("No new comments to clean");
        return Ok(stats);
    }
    info!("Cleaning {} comments", pending.len());

    let rows: Vec<CleanedComment> = pending
        .into_iter()
        .map(|(comment_id, body)| {
            let (cleaned_body, word_count) = clean_text(&body);
            CleanedComment {
                comment_id,
                cleaned_body,
                word_count,
            }
        })
        .collect();

    for chunk in rows.chunks(batch_size.max(1)) {
        match db.insert_cleaned_comments(chunk) {
            Ok(inserted) => stats.inserted += inserted,
            Err(e) => {
                error!(rows = chunk.len(), "Cleaned comment insert failed: {}", e);
                stats.failed_batches += 1;
            }
        }
    }

    info!("Inserted {} cleaned comments", stats.inserted);
    Ok(stats)
}
