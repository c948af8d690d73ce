//! Row types bridging `sqlx::FromRow` to the domain types in
//! `hydrocarbon-common`. Kept separate from the query bodies so the
//! wire shape (jsonb, bytea, smallint) is visible in one place.

use chrono::{DateTime, Utc};
use hydrocarbon_common::{Config, Feed, Folder, HydrocarbonError, PostFact, PostRecord, Result, Scrape, ScrapeState};
use sqlx::types::Json;
use uuid::Uuid;

use crate::decompress;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ScrapeRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub plugin: String,
    pub config: serde_json::Value,
    #[allow(dead_code)]
    pub config_schema_v: i16,
    pub created_at: DateTime<Utc>,
    pub scheduled_start_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: String,
    pub errors: Json<Vec<String>>,
    pub total_datums: i32,
    pub total_retries: i32,
    pub total_tasks: i32,
}

impl ScrapeRow {
    pub(crate) fn into_domain(self) -> Result<Scrape> {
        let config: Config =
            serde_json::from_value(self.config).map_err(|e| HydrocarbonError::Config(e.to_string()))?;
        let state: ScrapeState = self.state.parse().map_err(HydrocarbonError::Database)?;
        Ok(Scrape {
            id: self.id,
            feed_id: self.feed_id,
            plugin: self.plugin,
            config,
            created_at: self.created_at,
            scheduled_start_at: self.scheduled_start_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            state,
            errors: self.errors.0,
            total_datums: self.total_datums as i64,
            total_retries: self.total_retries as i64,
            total_tasks: self.total_tasks as i64,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub plugin: String,
    pub url: String,
}

impl FeedRow {
    pub(crate) fn into_domain(self) -> Feed {
        Feed { id: self.id, user_id: self.user_id, title: self.title, plugin: self.plugin, url: self.url }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FolderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

impl FolderRow {
    pub(crate) fn into_domain(self) -> Folder {
        Folder { id: self.id, user_id: self.user_id, name: self.name }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    #[allow(dead_code)]
    pub content_hash: String,
    pub title: String,
    pub author: String,
    pub body: Vec<u8>,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
}

impl PostRow {
    pub(crate) fn into_fact(self) -> PostFact {
        PostFact { title: self.title, author: self.author, body: decompress(&self.body), url: self.url, posted_at: self.posted_at }
    }
}

/// A post row joined against the caller's read status.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRecordRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    #[allow(dead_code)]
    pub content_hash: String,
    pub title: String,
    pub author: String,
    pub body: Vec<u8>,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl PostRecordRow {
    pub(crate) fn into_record(self) -> PostRecord {
        PostRecord {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            author: self.author,
            body: decompress(&self.body),
            url: self.url,
            posted_at: self.posted_at,
            read_at: self.read_at,
        }
    }
}
