//! Generic RSS/Atom plugin. One route, one entrypoint per scrape: fetch
//! the feed document, parse every entry into a `Post` fact, emit no
//! child tasks. Scheduling is a fixed poll interval rather than an
//! RFC 5545 recurrence, since a feed has no calendar of its own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hydrocarbon_common::{
    Config, ErrorKind, Fact, HydrocarbonError, PostFact, ScheduleRequest, ScrapeSchedule, Task, TaskError,
};
use hydrocarbon_core::http_client::HttpError;
use hydrocarbon_core::registry::{Context, Handler, HandlerOpts, HandlerResponse, Plugin, Route};
use tracing::warn;

const DEFAULT_POLL_INTERVAL_MINS: i64 = 60;

fn looks_like_feed_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".xml")
        || lower.ends_with(".rss")
        || lower.ends_with(".atom")
        || lower.contains("/feed")
        || lower.contains("/rss")
        || lower.contains("format=rss")
        || lower.contains("format=atom")
}

fn poll_interval_mins(config: &Config) -> i64 {
    config
        .extra
        .get("poll_interval_mins")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_POLL_INTERVAL_MINS)
}

pub struct FeedPlugin {
    routes: Vec<Route>,
}

impl FeedPlugin {
    pub fn new() -> Self {
        Self { routes: vec![Route::new(r"^https?://.+$", Arc::new(FeedHandler))] }
    }
}

impl Default for FeedPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for FeedPlugin {
    fn name(&self) -> &str {
        "feed"
    }

    fn validate_config(&self, config: &Config) -> Result<(), HydrocarbonError> {
        if config.entrypoints.len() != 1 {
            return Err(HydrocarbonError::Validation("feed plugin takes exactly one entrypoint".into()));
        }
        if looks_like_feed_url(&config.entrypoints[0]) {
            Ok(())
        } else {
            Err(HydrocarbonError::Validation("url does not look like an rss/atom feed".into()))
        }
    }

    async fn create_config(&self, url: &str, opts: &HandlerOpts) -> Result<(String, Config), HydrocarbonError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        let body = opts
            .http
            .get_text(url, &cancel)
            .await
            .map_err(|e| HydrocarbonError::Scraping(e.to_string()))?;
        let parsed =
            feed_rs::parser::parse(body.as_bytes()).map_err(|e| HydrocarbonError::Validation(e.to_string()))?;
        let title = parsed
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| url.to_string());
        let config = Config::new(
            vec![url.to_string()],
            serde_json::json!({ "poll_interval_mins": DEFAULT_POLL_INTERVAL_MINS }),
        );
        Ok((title, config))
    }

    fn propose_schedule(&self, request: &ScheduleRequest) -> Vec<ScrapeSchedule> {
        let interval = request
            .recent_scrapes
            .last()
            .map(|s| poll_interval_mins(&s.config))
            .unwrap_or(DEFAULT_POLL_INTERVAL_MINS);
        let base = request
            .recent_scrapes
            .iter()
            .filter_map(|s| s.ended_at)
            .max()
            .unwrap_or_else(Utc::now);
        let config = Config::new(
            vec![request.feed.url.clone()],
            serde_json::json!({ "poll_interval_mins": interval }),
        );
        vec![ScrapeSchedule { scheduled_start_at: base + Duration::minutes(interval), config }]
    }

    fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn max_concurrency(&self) -> usize {
        1
    }
}

struct FeedHandler;

#[async_trait]
impl Handler for FeedHandler {
    async fn handle(&self, cx: &Context, opts: &HandlerOpts, task: Task) -> Result<HandlerResponse, TaskError> {
        let body = opts.http.get_text(&task.url, &cx.cancel).await.map_err(map_http_error)?;

        let parsed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| TaskError::permanent(format!("failed to parse feed: {e}")))?;

        let facts = parsed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry.links.first()?.href.clone();
                let title = entry.title.map(|t| t.content).unwrap_or_default();
                let author = entry
                    .authors
                    .first()
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let body = entry
                    .content
                    .and_then(|c| c.body)
                    .or_else(|| entry.summary.map(|s| s.content))
                    .unwrap_or_default();
                let posted_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
                Some(Fact::Post(PostFact { title, author, body, url, posted_at }))
            })
            .collect();

        Ok(HandlerResponse { facts, tasks: Vec::new() })
    }
}

fn map_http_error(err: HttpError) -> TaskError {
    match err {
        HttpError::Status { status: 429, .. } => TaskError::rate_limited("rate limited"),
        HttpError::Status { status, .. } if (400..500).contains(&status) => {
            warn!(status, "feed url returned a client error");
            TaskError::permanent(format!("http {status}"))
        }
        HttpError::Status { status, .. } => TaskError::transient(format!("http {status}")),
        HttpError::Request(msg) => TaskError::transient(msg),
        HttpError::Cancelled => TaskError { kind: ErrorKind::Transient, message: "cancelled".into() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> Config {
        Config::new(vec![url.to_string()], serde_json::Value::Null)
    }

    #[test]
    fn accepts_common_feed_suffixes() {
        let plugin = FeedPlugin::new();
        assert!(plugin.validate_config(&config("https://example.com/blog/feed.xml")).is_ok());
        assert!(plugin.validate_config(&config("https://example.com/feed")).is_ok());
        assert!(plugin.validate_config(&config("https://example.com/index.rss")).is_ok());
    }

    #[test]
    fn rejects_urls_with_no_feed_signal() {
        let plugin = FeedPlugin::new();
        assert!(plugin.validate_config(&config("https://example.com/about")).is_err());
    }

    #[test]
    fn rejects_multi_entrypoint_configs() {
        let plugin = FeedPlugin::new();
        let multi = Config::new(
            vec!["https://example.com/feed.xml".into(), "https://example.com/other.xml".into()],
            serde_json::Value::Null,
        );
        assert!(plugin.validate_config(&multi).is_err());
    }

    #[test]
    fn schedule_falls_back_to_default_interval_with_no_history() {
        use hydrocarbon_common::Feed;
        use uuid::Uuid;

        let plugin = FeedPlugin::new();
        let request = ScheduleRequest {
            feed: Feed {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                title: "Example".into(),
                plugin: "feed".into(),
                url: "https://example.com/feed.xml".into(),
            },
            recent_scrapes: Vec::new(),
            recent_posts: Vec::new(),
        };
        let proposals = plugin.propose_schedule(&request);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].config.entrypoints, vec!["https://example.com/feed.xml".to_string()]);
    }
}
