use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A scrape's lifecycle state. Observed transitions are a subset of
/// `Waiting -> Running -> {Success, Errored}`; no other edges occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeState {
    Waiting,
    Running,
    Success,
    Errored,
}

impl ScrapeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeState::Waiting => "WAITING",
            ScrapeState::Running => "RUNNING",
            ScrapeState::Success => "SUCCESS",
            ScrapeState::Errored => "ERRORED",
        }
    }
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScrapeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(ScrapeState::Waiting),
            "RUNNING" => Ok(ScrapeState::Running),
            "SUCCESS" => Ok(ScrapeState::Success),
            "ERRORED" => Ok(ScrapeState::Errored),
            other => Err(format!("unknown scrape state: {other}")),
        }
    }
}

/// A plugin-owned opaque payload. The core never introspects it beyond
/// `entrypoints`; plugins decode the rest themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub entrypoints: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
    #[serde(default = "default_schema_v")]
    pub schema_v: u16,
}

fn default_schema_v() -> u16 {
    1
}

impl Config {
    pub fn new(entrypoints: Vec<String>, extra: serde_json::Value) -> Self {
        Self { entrypoints, extra, schema_v: 1 }
    }
}

/// A unit of work inside a single running scrape. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub url: String,
    pub metadata: serde_json::Value,
    pub retries: u32,
}

impl Task {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self { url: url.into(), metadata: serde_json::Value::Null, retries: 0 }
    }

    pub fn with_metadata<S: Into<String>>(url: S, metadata: serde_json::Value) -> Self {
        Self { url: url.into(), metadata, retries: 0 }
    }
}

/// A normalized post emitted by a handler. Identity is the content hash
/// over normalized `title | author | body | url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostFact {
    pub title: String,
    pub author: String,
    pub body: String,
    pub url: String,
    pub posted_at: DateTime<Utc>,
}

impl PostFact {
    /// Stable digest used for per-feed dedup. Normalizes whitespace/case
    /// so cosmetic re-scrapes of the same content don't create duplicates.
    pub fn content_hash(&self) -> String {
        let normalized = format!(
            "{}|{}|{}|{}",
            normalize(&self.title),
            normalize(&self.author),
            normalize(&self.body),
            normalize(&self.url),
        );
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// The only recognized concrete fact kind today. A closed tagged enum so
/// the Fact Writer can exhaustively match and reject unknown kinds at
/// compile time, per the spec's "dynamic dispatch" redesign note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Fact {
    Post(PostFact),
}

/// A scheduled execution of a plugin against a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scrape {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub plugin: String,
    pub config: Config,
    pub created_at: DateTime<Utc>,
    pub scheduled_start_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: ScrapeState,
    pub errors: Vec<String>,
    pub total_datums: i64,
    pub total_retries: i64,
    pub total_tasks: i64,
}

impl Scrape {
    pub fn new_waiting(feed_id: Uuid, plugin: String, config: Config, scheduled_start_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feed_id,
            plugin,
            config,
            created_at: Utc::now(),
            scheduled_start_at,
            started_at: None,
            ended_at: None,
            state: ScrapeState::Waiting,
            errors: Vec::new(),
            total_datums: 0,
            total_retries: 0,
            total_tasks: 0,
        }
    }
}

/// Final counters and outcome reported when a Scrape Runner finishes.
#[derive(Debug, Clone, Default)]
pub struct ScrapeCounters {
    pub total_datums: i64,
    pub total_retries: i64,
    pub total_tasks: i64,
}

/// A feed a user has subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub plugin: String,
    pub url: String,
}

/// A user-owned grouping of feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

/// A persisted post, as returned to API callers: the underlying
/// `PostFact` plus identity and per-user read state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub author: String,
    pub body: String,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Input to a plugin's `ScheduleProposer`: a feed missing a `WAITING`
/// scrape, along with recent history.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub feed: Feed,
    pub recent_scrapes: Vec<Scrape>,
    pub recent_posts: Vec<PostFact>,
}

/// A proposed future scrape, returned by a plugin's `ScheduleProposer`.
#[derive(Debug, Clone)]
pub struct ScrapeSchedule {
    pub scheduled_start_at: DateTime<Utc>,
    pub config: Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_across_case_and_whitespace() {
        let a = PostFact {
            title: "Hello World".into(),
            author: "Alice".into(),
            body: "  some body text  ".into(),
            url: "https://example.com/1".into(),
            posted_at: Utc::now(),
        };
        let b = PostFact {
            title: "hello world".into(),
            author: "alice".into(),
            body: "some body text".into(),
            url: "https://EXAMPLE.com/1".into(),
            posted_at: Utc::now(),
        };
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_differs_on_body_change() {
        let a = PostFact {
            title: "t".into(),
            author: "a".into(),
            body: "one".into(),
            url: "u".into(),
            posted_at: Utc::now(),
        };
        let b = PostFact { body: "two".into(), ..a.clone() };
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn scrape_state_round_trips_through_str() {
        for state in [ScrapeState::Waiting, ScrapeState::Running, ScrapeState::Success, ScrapeState::Errored] {
            let s: ScrapeState = state.as_str().parse().unwrap();
            assert_eq!(s, state);
        }
    }
}
