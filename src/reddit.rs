//! Reddit OAuth API client
//!
//! Application-only OAuth (client credentials), one rate limiter shared by all
//! calls, listings walked via the `after` cursor.

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{RedditConfig, RedditCredentials};
use crate::error::{IngestError, Result};
use crate::source::{
    AuthorRef, CommentNode, CommentTree, Continuation, ListingSource, RawComment, RawPost, Strategy,
};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Largest page the listing endpoints return
const PAGE_SIZE: u32 = 100;
/// Largest number of ids `/api/morechildren` accepts per call
const MORE_CHILDREN_MAX: usize = 100;

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    client: Client,
    rate_limiter: GovRateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    credentials: RedditCredentials,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    pub fn new(config: &RedditConfig, credentials: RedditCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            IngestError::Configuration("reddit.requests_per_minute must be > 0".into())
        })?;
        let rate_limiter = GovRateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            client,
            rate_limiter,
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Bearer token, fetched again shortly before it expires
    async fn bearer(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        self.rate_limiter.until_ready().await;
        debug!("Requesting access token");

        let response = self
            .client
            .post(AUTH_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(token_error(response.status()));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in.saturating_sub(60));
        let value = body.access_token;
        *guard = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(value)
    }

    /// Fetch a token up front so bad credentials stop the run before any
    /// subreddit is touched.
    pub async fn authenticate(&self) -> Result<()> {
        match self.bearer().await {
            Ok(_) => {
                debug!("Authenticated with Reddit");
                Ok(())
            }
            Err(e @ IngestError::Configuration(_)) => Err(e),
            Err(e) => Err(IngestError::Configuration(format!(
                "could not authenticate with Reddit: {}",
                e
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.bearer().await?;

        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", API_BASE, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(response.json().await?),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(IngestError::RemoteApi(format!("rate limited on {}", path)))
            }
            StatusCode::NOT_FOUND => Err(IngestError::RemoteApi(format!("{} not found", path))),
            s => Err(IngestError::RemoteApi(format!("{} failed: {}", path, s))),
        }
    }
}

#[async_trait]
impl ListingSource for RedditClient {
    async fn list_posts(&self, forum: &str, strategy: Strategy, limit: Option<u32>) -> Result<Vec<RawPost>> {
        let path = format!("/r/{}/{}", forum, strategy.name());
        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page_size = match limit {
                Some(limit) => limit.saturating_sub(posts.len() as u32).min(PAGE_SIZE),
                None => PAGE_SIZE,
            };
            if page_size == 0 {
                break;
            }

            let mut query = vec![("limit", page_size.to_string()), ("raw_json", "1".to_string())];
            if let Some(window) = strategy.time_window() {
                query.push(("t", window.as_str().to_string()));
            }
            if let Some(ref cursor) = after {
                query.push(("after", cursor.clone()));
            }

            let listing: Thing = self.get_json(&path, &query).await?;
            let listing = listing.into_listing()?;
            let page_len = listing.children.len();

            for child in listing.children {
                if child.kind == "t3" {
                    let link: LinkData = serde_json::from_value(child.data).map_err(payload_error)?;
                    posts.push(link.into_raw());
                }
            }

            debug!(forum, %strategy, page_len, total = posts.len(), "Listing page");

            after = listing.after;
            if after.is_none() || page_len == 0 {
                break;
            }
        }

        Ok(posts)
    }

    async fn comment_tree(&self, post_id: &str) -> Result<CommentTree> {
        let path = format!("/comments/{}", post_id);
        let query = [("raw_json", "1".to_string())];

        // [post listing, comment listing]
        let listings: Vec<Thing> = self.get_json(&path, &query).await?;
        let comments = listings
            .into_iter()
            .nth(1)
            .ok_or_else(|| IngestError::RemoteApi(format!("no comment listing for {}", post_id)))?
            .into_listing()?;

        let nodes = comments
            .children
            .into_iter()
            .map(parse_node)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        Ok(CommentTree {
            post_id: post_id.to_string(),
            nodes,
        })
    }

    async fn expand_continuation(&self, post_id: &str, continuation: &Continuation) -> Result<Vec<CommentNode>> {
        let take = continuation.children.len().min(MORE_CHILDREN_MAX);
        let (requested, rest) = continuation.children.split_at(take);

        let query = [
            ("api_type", "json".to_string()),
            ("link_id", format!("t3_{}", post_id)),
            ("children", requested.join(",")),
            ("limit_children", "false".to_string()),
            ("raw_json", "1".to_string()),
        ];
        let response: MoreChildrenResponse = self.get_json("/api/morechildren", &query).await?;

        if let Some(first) = response.json.errors.first() {
            return Err(IngestError::RemoteApi(format!("morechildren error: {}", first)));
        }

        let things = response.json.data.map(|d| d.things).unwrap_or_default();
        let mut nodes = build_forest(things, &continuation.parent_id)?;

        if !rest.is_empty() {
            nodes.push(CommentNode::More(Continuation {
                parent_id: continuation.parent_id.clone(),
                children: rest.to_vec(),
                count: rest.len() as i64,
            }));
        }

        Ok(nodes)
    }

    async fn subscriber_count(&self, forum: &str) -> Result<Option<i64>> {
        let path = format!("/r/{}/about", forum);
        let thing: Thing = self.get_json(&path, &[("raw_json", "1".to_string())]).await?;
        Ok(thing.into_about()?.subscribers)
    }
}

/// 401 / 403 from the token endpoint means the app credentials are wrong.
fn token_error(status: StatusCode) -> IngestError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => IngestError::Configuration(format!(
            "Reddit rejected the client credentials ({})",
            status
        )),
        s => IngestError::RemoteApi(format!("token request failed: {}", s)),
    }
}

fn payload_error(e: serde_json::Error) -> IngestError {
    IngestError::RemoteApi(format!("unexpected payload: {}", e))
}

/// Convert one `t1` / `more` thing (with its nested replies) into a node.
fn parse_node(thing: Thing) -> Result<Option<CommentNode>> {
    match thing.kind.as_str() {
        "t1" => {
            let mut data: CommentData = serde_json::from_value(thing.data).map_err(payload_error)?;
            let replies = match std::mem::take(&mut data.replies) {
                value @ Value::Object(_) => {
                    let listing: Thing = serde_json::from_value(value).map_err(payload_error)?;
                    listing
                        .into_listing()?
                        .children
                        .into_iter()
                        .map(parse_node)
                        .collect::<Result<Vec<_>>>()?
                        .into_iter()
                        .flatten()
                        .collect()
                }
                _ => Vec::new(),
            };
            Ok(Some(CommentNode::Comment {
                comment: data.into_raw(),
                replies,
            }))
        }
        "more" => {
            let data: MoreData = serde_json::from_value(thing.data).map_err(payload_error)?;
            Ok(Some(CommentNode::More(Continuation {
                parent_id: data.parent_id,
                children: data.children,
                count: data.count,
            })))
        }
        _ => Ok(None),
    }
}

/// `/api/morechildren` returns a flat list; rebuild the subtrees hanging off
/// `root_parent` from each thing's `parent_id`.
fn build_forest(things: Vec<Thing>, root_parent: &str) -> Result<Vec<CommentNode>> {
    let mut by_parent: HashMap<String, Vec<Thing>> = HashMap::new();
    for thing in things {
        let parent = thing
            .data
            .get("parent_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        by_parent.entry(parent).or_default().push(thing);
    }

    fn attach(parent: &str, by_parent: &mut HashMap<String, Vec<Thing>>) -> Result<Vec<CommentNode>> {
        let Some(children) = by_parent.remove(parent) else {
            return Ok(Vec::new());
        };

        let mut nodes = Vec::with_capacity(children.len());
        for thing in children {
            if let Some(node) = parse_node(thing)? {
                let node = match node {
                    CommentNode::Comment { comment, mut replies } => {
                        let fullname = format!("t1_{}", comment.id);
                        replies.extend(attach(&fullname, by_parent)?);
                        CommentNode::Comment { comment, replies }
                    }
                    more => more,
                };
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    attach(root_parent, &mut by_parent)
}

// === API Response Types ===

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Thing {
    fn into_listing(self) -> Result<ListingData> {
        if self.kind != "Listing" {
            return Err(IngestError::RemoteApi(format!("expected Listing, got {}", self.kind)));
        }
        serde_json::from_value(self.data).map_err(payload_error)
    }

    fn into_about(self) -> Result<AboutData> {
        if self.kind != "t5" {
            return Err(IngestError::RemoteApi(format!("expected subreddit, got {}", self.kind)));
        }
        serde_json::from_value(self.data).map_err(payload_error)
    }
}

#[derive(Debug, Deserialize)]
struct AboutData {
    #[serde(default)]
    subscribers: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenResponse {
    json: MoreChildrenJson,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenJson {
    #[serde(default)]
    errors: Vec<Value>,
    #[serde(default)]
    data: Option<MoreChildrenData>,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<Thing>,
}

fn author_ref(fullname: Option<String>, name: Option<String>) -> Option<AuthorRef> {
    match (fullname, name) {
        (Some(fullname), Some(name)) if name != "[deleted]" => Some(AuthorRef { fullname, name }),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct LinkData {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    author_fullname: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    link_flair_text: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    upvote_ratio: f64,
    #[serde(default)]
    stickied: bool,
}

impl LinkData {
    fn into_raw(self) -> RawPost {
        RawPost {
            author: author_ref(self.author_fullname, self.author),
            id: self.id,
            title: self.title,
            selftext: self.selftext,
            url: self.url,
            flair: self.link_flair_text,
            created_utc: self.created_utc,
            score: self.score,
            num_comments: self.num_comments,
            upvote_ratio: self.upvote_ratio,
            stickied: self.stickied,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    author_fullname: Option<String>,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    body: String,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    depth: i64,
    #[serde(default)]
    is_submitter: bool,
    #[serde(default)]
    stickied: bool,
    /// Empty string when there are no replies, a Listing otherwise
    #[serde(default)]
    replies: Value,
}

impl CommentData {
    fn into_raw(self) -> RawComment {
        RawComment {
            author: author_ref(self.author_fullname, self.author),
            id: self.id,
            parent_id: self.parent_id,
            body: self.body,
            created_utc: self.created_utc,
            score: self.score,
            depth: self.depth,
            is_submitter: self.is_submitter,
            stickied: self.stickied,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MoreData {
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    count: i64,
}
