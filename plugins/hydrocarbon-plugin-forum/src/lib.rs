//! Demonstration plugin for a listing + detail forum layout. Shows the
//! child-task pattern the spec calls out explicitly: the listing route
//! emits one `Task` per thread and no facts, the detail route emits one
//! `Post` fact per thread and no further tasks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hydrocarbon_common::{
    Config, ErrorKind, Fact, HydrocarbonError, PostFact, ScheduleRequest, ScrapeSchedule, Task, TaskError,
};
use hydrocarbon_core::http_client::HttpError;
use hydrocarbon_core::registry::{Context, Handler, HandlerOpts, HandlerResponse, Plugin, Route};
use scraper::{Html, Selector};
use url::Url;

const POLL_INTERVAL_MINS: i64 = 120;

pub struct ForumPlugin {
    routes: Vec<Route>,
}

impl ForumPlugin {
    pub fn new() -> Self {
        Self {
            routes: vec![
                Route::new(r"^https?://[^/]+/forum/thread/[^/]+/?$", Arc::new(ThreadHandler)),
                Route::new(r"^https?://[^/]+/forum/?$", Arc::new(ListingHandler)),
            ],
        }
    }
}

impl Default for ForumPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ForumPlugin {
    fn name(&self) -> &str {
        "forum"
    }

    fn validate_config(&self, config: &Config) -> Result<(), HydrocarbonError> {
        if config.entrypoints.len() != 1 {
            return Err(HydrocarbonError::Validation("forum plugin takes exactly one entrypoint".into()));
        }
        let url = &config.entrypoints[0];
        if url.trim_end_matches('/').ends_with("/forum") {
            Ok(())
        } else {
            Err(HydrocarbonError::Validation("url is not a recognized forum listing page".into()))
        }
    }

    async fn create_config(&self, url: &str, opts: &HandlerOpts) -> Result<(String, Config), HydrocarbonError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        let body = opts
            .http
            .get_text(url, &cancel)
            .await
            .map_err(|e| HydrocarbonError::Scraping(e.to_string()))?;
        let document = Html::parse_document(&body);
        let title_selector = Selector::parse("title").expect("static selector");
        let title = document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| url.to_string());
        Ok((title, Config::new(vec![url.to_string()], serde_json::Value::Null)))
    }

    fn propose_schedule(&self, request: &ScheduleRequest) -> Vec<ScrapeSchedule> {
        let base = request
            .recent_scrapes
            .iter()
            .filter_map(|s| s.ended_at)
            .max()
            .unwrap_or_else(Utc::now);
        let config = Config::new(vec![request.feed.url.clone()], serde_json::Value::Null);
        vec![ScrapeSchedule { scheduled_start_at: base + Duration::minutes(POLL_INTERVAL_MINS), config }]
    }

    fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn max_concurrency(&self) -> usize {
        4
    }
}

struct ListingHandler;

#[async_trait]
impl Handler for ListingHandler {
    async fn handle(&self, cx: &Context, opts: &HandlerOpts, task: Task) -> Result<HandlerResponse, TaskError> {
        let body = opts.http.get_text(&task.url, &cx.cancel).await.map_err(map_http_error)?;

        let base = Url::parse(&task.url).map_err(|e| TaskError::permanent(format!("bad listing url: {e}")))?;
        let document = Html::parse_document(&body);
        let selector = Selector::parse("a.thread-link[href]")
            .map_err(|e| TaskError::permanent(format!("bad selector: {e:?}")))?;

        let tasks = document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(|url| Task::new(url.to_string()))
            .collect();

        Ok(HandlerResponse { facts: Vec::new(), tasks })
    }
}

struct ThreadHandler;

#[async_trait]
impl Handler for ThreadHandler {
    async fn handle(&self, cx: &Context, opts: &HandlerOpts, task: Task) -> Result<HandlerResponse, TaskError> {
        let body = opts.http.get_text(&task.url, &cx.cancel).await.map_err(map_http_error)?;

        let document = Html::parse_document(&body);
        let title = select_text(&document, "h1.thread-title").unwrap_or_default();
        let author = select_text(&document, ".thread-author").unwrap_or_else(|| "unknown".to_string());
        let content = select_text(&document, ".thread-body").unwrap_or_default();
        let posted_at = select_datetime(&document, "time[datetime]").unwrap_or_else(Utc::now);

        if title.is_empty() && content.is_empty() {
            return Err(TaskError::permanent("thread page has neither title nor body"));
        }

        let fact = Fact::Post(PostFact { title, author, body: content, url: task.url, posted_at });
        Ok(HandlerResponse { facts: vec![fact], tasks: Vec::new() })
    }
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = document.select(&selector).next()?.text().collect::<Vec<_>>().join(" ");
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_datetime(document: &Html, selector: &str) -> Option<DateTime<Utc>> {
    let selector = Selector::parse(selector).ok()?;
    let raw = document.select(&selector).next()?.value().attr("datetime")?;
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

fn map_http_error(err: HttpError) -> TaskError {
    match err {
        HttpError::Status { status: 429, .. } => TaskError::rate_limited("rate limited"),
        HttpError::Status { status, .. } if (400..500).contains(&status) => TaskError::permanent(format!("http {status}")),
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
    fn accepts_forum_listing_urls() {
        let plugin = ForumPlugin::new();
        assert!(plugin.validate_config(&config("https://example.com/forum")).is_ok());
        assert!(plugin.validate_config(&config("https://example.com/forum/")).is_ok());
    }

    #[test]
    fn rejects_non_listing_urls() {
        let plugin = ForumPlugin::new();
        assert!(plugin.validate_config(&config("https://example.com/forum/thread/1")).is_err());
    }

    #[test]
    fn listing_route_is_tried_before_catching_as_a_thread() {
        let plugin = ForumPlugin::new();
        let (_, params) =
            hydrocarbon_core::registry::route_task(&plugin, "https://example.com/forum/thread/abc-123").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn listing_text_extraction_resolves_relative_thread_links() {
        let html = r#"<html><body>
            <a class="thread-link" href="/forum/thread/1">First</a>
            <a class="thread-link" href="/forum/thread/2">Second</a>
            <a class="other-link" href="/forum/not-a-thread">Ignored</a>
        </body></html>"#;
        let base = Url::parse("https://example.com/forum").unwrap();
        let document = Html::parse_document(html);
        let selector = Selector::parse("a.thread-link[href]").unwrap();
        let hrefs: Vec<String> = document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(|u| u.to_string())
            .collect();
        assert_eq!(hrefs, vec!["https://example.com/forum/thread/1", "https://example.com/forum/thread/2"]);
    }

    #[test]
    fn thread_text_extraction_reads_title_author_and_body() {
        let html = r#"<html><body>
            <h1 class="thread-title">Welcome thread</h1>
            <span class="thread-author">jdoe</span>
            <div class="thread-body">Hello, forum.</div>
            <time datetime="2026-01-02T03:04:05Z"></time>
        </body></html>"#;
        let document = Html::parse_document(html);
        assert_eq!(select_text(&document, "h1.thread-title").as_deref(), Some("Welcome thread"));
        assert_eq!(select_text(&document, ".thread-author").as_deref(), Some("jdoe"));
        assert_eq!(select_text(&document, ".thread-body").as_deref(), Some("Hello, forum."));
        assert!(select_datetime(&document, "time[datetime]").is_some());
    }
}
