//! Post and comment fetching on top of a [`ListingSource`]
//!
//! Posts are collected from several listings and merged by id, since any single
//! listing is capped upstream. Comment trees are expanded a bounded number of
//! times and then flattened.

use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::source::{CommentNode, CommentTree, ListingSource, RawComment, RawPost, Strategy};

/// Posts merged across strategies, plus the strategies that failed.
#[derive(Debug, Default)]
pub struct PostFetch {
    pub posts: Vec<RawPost>,
    pub failed: Vec<(Strategy, IngestError)>,
}

pub struct Fetcher<'a, S: ListingSource + ?Sized> {
    source: &'a S,
    max_continuations: usize,
}

impl<'a, S: ListingSource + ?Sized> Fetcher<'a, S> {
    pub fn new(source: &'a S, max_continuations: usize) -> Self {
        Self {
            source,
            max_continuations,
        }
    }

    /// Run every strategy against `forum` and merge the results by post id.
    ///
    /// A failing strategy contributes nothing; the others still run.
    pub async fn fetch_posts(
        &self,
        forum: &str,
        strategies: &[Strategy],
        limit: Option<u32>,
    ) -> PostFetch {
        info!(forum, "Fetching posts across {} listings", strategies.len());

        let mut merged: HashMap<String, RawPost> = HashMap::new();
        let mut failed = Vec::new();

        for &strategy in strategies {
            match self.source.list_posts(forum, strategy, limit).await {
                Ok(posts) => {
                    debug!(forum, %strategy, count = posts.len(), "Listing fetched");
                    for post in posts {
                        merged.insert(post.id.clone(), post);
                    }
                }
                Err(e) => {
                    warn!(forum, %strategy, "Could not fetch listing: {}", e);
                    failed.push((strategy, e));
                }
            }
        }

        info!(forum, unique = merged.len(), "Found unique posts across listings");

        PostFetch {
            posts: merged.into_values().collect(),
            failed,
        }
    }

    /// Fetch a post's comments, expanding at most `max_continuations`
    /// placeholders, and flatten them breadth-first.
    pub async fn fetch_comments(&self, post_id: &str) -> Result<Vec<RawComment>> {
        let mut tree = self.source.comment_tree(post_id).await?;
        let expanded = self.expand_continuations(&mut tree).await?;
        if expanded > 0 {
            debug!(post_id, expanded, "Expanded comment continuations");
        }
        Ok(flatten(tree))
    }

    async fn expand_continuations(&self, tree: &mut CommentTree) -> Result<usize> {
        let mut expanded = 0;

        while let Some(path) = find_continuation(&tree.nodes) {
            let Some((&index, parent_path)) = path.split_last() else {
                break;
            };

            let continuation = {
                let siblings = match siblings_mut(&mut tree.nodes, parent_path) {
                    Some(s) => s,
                    None => break,
                };
                match siblings.get(index) {
                    Some(CommentNode::More(more)) => more.clone(),
                    _ => break,
                }
            };

            // "Continue this thread" links carry no ids and cost no API call
            let replacement = if continuation.children.is_empty() {
                Vec::new()
            } else if expanded < self.max_continuations {
                expanded += 1;
                self.source
                    .expand_continuation(&tree.post_id, &continuation)
                    .await?
            } else {
                // Budget spent: everything left is dropped when flattening
                break;
            };

            if let Some(siblings) = siblings_mut(&mut tree.nodes, parent_path) {
                siblings.splice(index..=index, replacement);
            }
        }

        Ok(expanded)
    }
}

/// Path of indices to the first continuation in breadth-first order.
fn find_continuation(nodes: &[CommentNode]) -> Option<Vec<usize>> {
    let mut queue: VecDeque<(Vec<usize>, &CommentNode)> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (vec![i], node))
        .collect();

    while let Some((path, node)) = queue.pop_front() {
        match node {
            CommentNode::More(_) => return Some(path),
            CommentNode::Comment { replies, .. } => {
                for (i, child) in replies.iter().enumerate() {
                    let mut child_path = path.clone();
                    child_path.push(i);
                    queue.push_back((child_path, child));
                }
            }
        }
    }

    None
}

fn siblings_mut<'t>(nodes: &'t mut Vec<CommentNode>, parent_path: &[usize]) -> Option<&'t mut Vec<CommentNode>> {
    let mut current = nodes;
    for &i in parent_path {
        match current.get_mut(i)? {
            CommentNode::Comment { replies, .. } => current = replies,
            CommentNode::More(_) => return None,
        }
    }
    Some(current)
}

/// Breadth-first list of real comments; unexpanded continuations are dropped.
/// Parents are not guaranteed to precede children across expansions, only
/// `parent_id` links them.
pub fn flatten(tree: CommentTree) -> Vec<RawComment> {
    let mut out = Vec::new();
    let mut queue: VecDeque<CommentNode> = tree.nodes.into();

    while let Some(node) = queue.pop_front() {
        if let CommentNode::Comment { comment, replies } = node {
            out.push(comment);
            queue.extend(replies);
        }
    }

    out
}
