//! The Store Contract — the only interface the Discollector depends on
//! for durable state. Implemented against Postgres by `hydrocarbon-store`;
//! an in-memory double lives behind the `test-support` feature for
//! deterministic tests with no database.

use async_trait::async_trait;
use hydrocarbon_common::{
    Fact, Feed, Folder, PostRecord, Result, Scrape, ScrapeCounters, ScrapeState, ScheduleRequest,
    ScrapeSchedule,
};
use uuid::Uuid;

/// Scrape lifecycle, scheduling, and fact persistence, plus the minimal
/// reads the core needs. Feed/folder/session CRUD used only by the HTTP
/// API is also declared here so a single `Store` implementation backs
/// both processes, matching the spec's grouping in §4.7.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically claim up to `limit` ready scrapes
    /// (`WAITING AND scheduled_start_at <= now() AND errors.length < 3`),
    /// transition them to `RUNNING`, and return them. Must be race-free
    /// across concurrent callers.
    async fn start_scrapes(&self, limit: i64) -> Result<Vec<Scrape>>;

    /// Terminal transition for a scrape.
    async fn end_scrape(
        &self,
        id: Uuid,
        state: ScrapeState,
        counters: ScrapeCounters,
        error: Option<String>,
    ) -> Result<()>;

    /// Feeds with no `WAITING` scrape, with recent scrape/post history.
    async fn find_missing_schedules(&self, limit: i64, history_limit: i64) -> Result<Vec<ScheduleRequest>>;

    /// Idempotent insert of proposed schedules as `WAITING` scrapes. Relies
    /// on the `(plugin, scheduled_start_at, config)` unique constraint to
    /// skip duplicates.
    async fn insert_schedule(&self, feed_id: Uuid, plugin: &str, schedules: &[ScrapeSchedule]) -> Result<()>;

    /// Read-only listing for operational tooling.
    async fn list_scrapes(&self, state: Option<ScrapeState>, limit: i64, offset: i64) -> Result<Vec<Scrape>>;

    /// Persist a fact emitted by a handler. Idempotent by content hash;
    /// refreshes existing rows by `url` conflict.
    async fn write_fact(&self, scrape_id: Uuid, fact: Fact) -> Result<()>;

    /// Verify an opaque session key, returning the owning user on success.
    /// The core never introspects identity beyond this.
    async fn verify_key(&self, key: &str) -> Result<Option<Uuid>>;

    /// Issues a one-time login token for `email`, creating the user if
    /// this is their first sign-in.
    async fn create_login_token(&self, email: &str) -> Result<String>;

    /// Consumes a login token and mints a session key.
    async fn create_session(&self, token: &str) -> Result<String>;

    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<Feed>>;

    async fn create_feed(&self, user_id: Uuid, title: String, plugin: String, url: String) -> Result<Feed>;

    async fn remove_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<()>;

    async fn list_folders(&self, user_id: Uuid) -> Result<Vec<Folder>>;

    async fn create_folder(&self, user_id: Uuid, name: String) -> Result<Folder>;

    /// Posts visible to `user_id`, optionally scoped to one feed, newest
    /// first.
    async fn list_posts(&self, user_id: Uuid, feed_id: Option<Uuid>, limit: i64, offset: i64) -> Result<Vec<PostRecord>>;

    async fn get_post(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<PostRecord>>;

    async fn mark_post_read(&self, user_id: Uuid, post_id: Uuid) -> Result<()>;
}
