//! Postgres-backed implementation of `hydrocarbon_core::Store`.

mod rows;

use std::io::{Read, Write};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hydrocarbon_common::{
    Fact, Feed, Folder, HydrocarbonError, PostRecord, Result, Scrape, ScrapeCounters, ScrapeState,
    ScheduleRequest, ScrapeSchedule,
};
use hydrocarbon_core::Store;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use rows::{FeedRow, FolderRow, PostRecordRow, PostRow, ScrapeRow};

const MAX_ERRORS: usize = 50;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and runs the embedded migrations, matching the teacher's
    /// `ArchiveStore::migrate` / `run_migrations` binary pattern.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(16).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> HydrocarbonError {
    HydrocarbonError::Database(e.to_string())
}

pub(crate) fn compress(body: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).expect("in-memory gzip write cannot fail");
    encoder.finish().expect("in-memory gzip finish cannot fail")
}

pub(crate) fn decompress(bytes: &[u8]) -> String {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    if decoder.read_to_string(&mut out).is_err() {
        warn!("stored post body failed to decompress, returning empty body");
        return String::new();
    }
    out
}

#[async_trait]
impl Store for PgStore {
    async fn start_scrapes(&self, limit: i64) -> Result<Vec<Scrape>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows: Vec<ScrapeRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, plugin, config, config_schema_v, created_at,
                   scheduled_start_at, started_at, ended_at, state, errors,
                   total_datums, total_retries, total_tasks
            FROM scrapes
            WHERE state = 'WAITING'
              AND scheduled_start_at <= now()
              AND jsonb_array_length(errors) < 3
            ORDER BY scheduled_start_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        for row in &rows {
            sqlx::query("UPDATE scrapes SET state = 'RUNNING', started_at = now() WHERE id = $1")
                .bind(row.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let mut scrape = row.into_domain()?;
                scrape.state = ScrapeState::Running;
                Ok(scrape)
            })
            .collect()
    }

    async fn end_scrape(
        &self,
        id: Uuid,
        state: ScrapeState,
        counters: ScrapeCounters,
        error: Option<String>,
    ) -> Result<()> {
        let errors_json = if let Some(message) = error {
            let existing: Option<(sqlx::types::Json<Vec<String>>,)> =
                sqlx::query_as("SELECT errors FROM scrapes WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
            let mut errors = existing.map(|(e,)| e.0).unwrap_or_default();
            errors.push(message);
            if errors.len() > MAX_ERRORS {
                let excess = errors.len() - MAX_ERRORS;
                errors.drain(0..excess);
            }
            Some(sqlx::types::Json(errors))
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE scrapes
            SET state = $2, ended_at = now(), total_datums = $3, total_retries = $4,
                total_tasks = $5, errors = COALESCE($6, errors)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(state.as_str())
        .bind(counters.total_datums as i32)
        .bind(counters.total_retries as i32)
        .bind(counters.total_tasks as i32)
        .bind(errors_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn find_missing_schedules(&self, limit: i64, history_limit: i64) -> Result<Vec<ScheduleRequest>> {
        let feeds: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.user_id, f.title, f.plugin, f.url
            FROM feeds f
            WHERE NOT EXISTS (
                SELECT 1 FROM scrapes s WHERE s.feed_id = f.id AND s.state = 'WAITING'
            )
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut requests = Vec::with_capacity(feeds.len());
        for feed_row in feeds {
            let scrape_rows: Vec<ScrapeRow> = sqlx::query_as(
                r#"
                SELECT id, feed_id, plugin, config, config_schema_v, created_at,
                       scheduled_start_at, started_at, ended_at, state, errors,
                       total_datums, total_retries, total_tasks
                FROM scrapes
                WHERE feed_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(feed_row.id)
            .bind(history_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let post_rows: Vec<PostRow> = sqlx::query_as(
                r#"
                SELECT id, feed_id, content_hash, title, author, body, url, posted_at, created_at
                FROM posts
                WHERE feed_id = $1
                ORDER BY posted_at DESC
                LIMIT $2
                "#,
            )
            .bind(feed_row.id)
            .bind(history_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let mut recent_scrapes = Vec::with_capacity(scrape_rows.len());
            for row in scrape_rows {
                recent_scrapes.push(row.into_domain()?);
            }

            requests.push(ScheduleRequest {
                feed: feed_row.into_domain(),
                recent_scrapes,
                recent_posts: post_rows.into_iter().map(|r| r.into_fact()).collect(),
            });
        }

        Ok(requests)
    }

    async fn insert_schedule(&self, feed_id: Uuid, plugin: &str, schedules: &[ScrapeSchedule]) -> Result<()> {
        for proposal in schedules {
            let config_json = serde_json::to_value(&proposal.config).map_err(|e| HydrocarbonError::Config(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO scrapes (feed_id, plugin, config, config_schema_v, scheduled_start_at, state)
                VALUES ($1, $2, $3, $4, $5, 'WAITING')
                ON CONFLICT (plugin, scheduled_start_at, config) DO NOTHING
                "#,
            )
            .bind(feed_id)
            .bind(plugin)
            .bind(&config_json)
            .bind(proposal.config.schema_v as i16)
            .bind(proposal.scheduled_start_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn list_scrapes(&self, state_filter: Option<ScrapeState>, limit: i64, offset: i64) -> Result<Vec<Scrape>> {
        let rows: Vec<ScrapeRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, plugin, config, config_schema_v, created_at,
                   scheduled_start_at, started_at, ended_at, state, errors,
                   total_datums, total_retries, total_tasks
            FROM scrapes
            WHERE $1::text IS NULL OR state = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(state_filter.map(|s| s.as_str().to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn write_fact(&self, scrape_id: Uuid, fact: Fact) -> Result<()> {
        let Fact::Post(post) = fact;

        let feed_id: Option<(Uuid,)> = sqlx::query_as("SELECT feed_id FROM scrapes WHERE id = $1")
            .bind(scrape_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some((feed_id,)) = feed_id else {
            return Err(HydrocarbonError::Validation(format!("unknown scrape {scrape_id}")));
        };

        let hash = post.content_hash();

        let existing: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, url FROM posts WHERE feed_id = $1 AND content_hash = $2")
                .bind(feed_id)
                .bind(&hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        if let Some((_, existing_url)) = existing {
            if existing_url == post.url {
                return Ok(());
            }
        }

        sqlx::query(
            r#"
            INSERT INTO posts (feed_id, content_hash, title, author, body, url, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (url) DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                title = EXCLUDED.title,
                author = EXCLUDED.author,
                body = EXCLUDED.body,
                posted_at = EXCLUDED.posted_at
            "#,
        )
        .bind(feed_id)
        .bind(&hash)
        .bind(&post.title)
        .bind(&post.author)
        .bind(compress(&post.body))
        .bind(&post.url)
        .bind(post.posted_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn verify_key(&self, key: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM sessions WHERE key = $1 AND expires_at > now()")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(id,)| id))
    }

    async fn create_login_token(&self, email: &str) -> Result<String> {
        let user_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO users (email) VALUES ($1)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO login_tokens (token, user_id, expires_at) VALUES ($1, $2, now() + interval '1 hour')")
            .bind(&token)
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(token)
    }

    async fn create_session(&self, token: &str) -> Result<String> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM login_tokens WHERE token = $1 AND consumed_at IS NULL AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some((user_id,)) = row else {
            return Err(HydrocarbonError::Validation("unknown or expired login token".into()));
        };

        sqlx::query("UPDATE login_tokens SET consumed_at = now() WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let key = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (key, user_id, expires_at) VALUES ($1, $2, now() + interval '30 days')")
            .bind(&key)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(key)
    }

    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as("SELECT id, user_id, title, plugin, url FROM feeds WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    async fn create_feed(&self, user_id: Uuid, title: String, plugin: String, url: String) -> Result<Feed> {
        let row: FeedRow = sqlx::query_as(
            r#"
            INSERT INTO feeds (user_id, title, plugin, url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, plugin, url
            "#,
        )
        .bind(user_id)
        .bind(&title)
        .bind(&plugin)
        .bind(&url)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into_domain())
    }

    async fn remove_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM feeds WHERE id = $1 AND user_id = $2")
            .bind(feed_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_folders(&self, user_id: Uuid) -> Result<Vec<Folder>> {
        let rows: Vec<FolderRow> = sqlx::query_as("SELECT id, user_id, name FROM folders WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    async fn create_folder(&self, user_id: Uuid, name: String) -> Result<Folder> {
        let row: FolderRow = sqlx::query_as(
            "INSERT INTO folders (user_id, name) VALUES ($1, $2) RETURNING id, user_id, name",
        )
        .bind(user_id)
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into_domain())
    }

    async fn list_posts(&self, user_id: Uuid, feed_id: Option<Uuid>, limit: i64, offset: i64) -> Result<Vec<PostRecord>> {
        let rows: Vec<PostRecordRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.feed_id, p.content_hash, p.title, p.author, p.body, p.url,
                   p.posted_at, p.created_at, r.read_at
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            LEFT JOIN read_statuses r ON r.post_id = p.id AND r.user_id = $1
            WHERE f.user_id = $1 AND ($2::uuid IS NULL OR p.feed_id = $2)
            ORDER BY p.posted_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|row| row.into_record()).collect())
    }

    async fn get_post(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<PostRecord>> {
        let row: Option<PostRecordRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.feed_id, p.content_hash, p.title, p.author, p.body, p.url,
                   p.posted_at, p.created_at, r.read_at
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            LEFT JOIN read_statuses r ON r.post_id = p.id AND r.user_id = $1
            WHERE f.user_id = $1 AND p.id = $2
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| row.into_record()))
    }

    async fn mark_post_read(&self, user_id: Uuid, post_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO read_statuses (user_id, post_id)
            SELECT $1, $2 FROM posts p JOIN feeds f ON f.id = p.feed_id
            WHERE p.id = $2 AND f.user_id = $1
            ON CONFLICT (user_id, post_id) DO UPDATE SET read_at = now()
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
