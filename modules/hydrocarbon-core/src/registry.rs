//! Plugin Registry & route dispatch (spec §4.1).
//!
//! The registry is immutable after construction — safe to read
//! concurrently without locking, per the spec's concurrency model. It is
//! built once at process startup from a compile-time list of plugins; no
//! dynamic loading, matching the Non-goal that plugins are first-class
//! and compiled in.

use std::sync::Arc;

use async_trait::async_trait;
use hydrocarbon_common::{Config, Fact, HydrocarbonError, ScheduleRequest, ScrapeSchedule, Task, TaskError};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::http_client::HttpClient;

/// A plugin-owned handler bound to a regex route. Handlers never see
/// sibling task ordering — `max_concurrency` workers complete tasks out
/// of order by design.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        cx: &Context,
        opts: &HandlerOpts,
        task: Task,
    ) -> Result<HandlerResponse, TaskError>;
}

/// One plugin route: first matching pattern (in declaration order) wins.
pub struct Route {
    pub pattern: Regex,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(pattern: &str, handler: Arc<dyn Handler>) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid route pattern {pattern:?}: {e}")),
            handler,
        }
    }
}

/// A handler's output: facts to persist and child tasks to enqueue.
#[derive(Debug, Default)]
pub struct HandlerResponse {
    pub facts: Vec<Fact>,
    pub tasks: Vec<Task>,
}

/// Cancellation handle threaded through every suspension point a handler
/// might hit (HTTP fetch, rate-limiter acquire).
#[derive(Clone)]
pub struct Context {
    pub cancel: CancellationToken,
}

/// Per-task dependencies handed to a handler: the rate-limited HTTP
/// client and the route's captured positional parameters.
pub struct HandlerOpts {
    pub http: Arc<HttpClient>,
    pub params: Vec<String>,
}

/// A compiled-in content source. Identity is `name`, which must be unique
/// within a `PluginRegistry`.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Rejects a config whose entrypoints this plugin can't handle.
    fn validate_config(&self, config: &Config) -> Result<(), HydrocarbonError>;

    /// Given a seed URL, returns a feed title and an initial `Config`.
    async fn create_config(&self, url: &str, opts: &HandlerOpts) -> Result<(String, Config), HydrocarbonError>;

    /// Proposes zero or more future scrapes based on recent history.
    fn propose_schedule(&self, request: &ScheduleRequest) -> Vec<ScrapeSchedule>;

    /// Ordered `(regex, handler)` routes. First match wins.
    fn routes(&self) -> &[Route];

    fn max_concurrency(&self) -> usize {
        4
    }

    fn max_task_retries(&self) -> u32 {
        3
    }
}

/// Resolves a task's URL to its handler within a plugin, via the
/// plugin's ordered route list. A task whose URL matches no route is a
/// fatal, non-retryable error for that task.
pub fn route_task<'a>(plugin: &'a dyn Plugin, url: &str) -> Option<(Arc<dyn Handler>, Vec<String>)> {
    for route in plugin.routes() {
        if let Some(captures) = route.pattern.captures(url) {
            let params = captures
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            return Some((route.handler.clone(), params));
        }
    }
    None
}

/// The immutable set of compiled-in plugins.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// A GET-style listing of registered plugin names (spec §9 Open
    /// Question: exactly one `listPlugins` behavior).
    pub fn list_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Returns the first plugin whose `validate_config` accepts `url` as
    /// a sole entrypoint, skipping any plugin named in `blacklist`. The
    /// blacklist lets a caller retry with alternative plugins when one
    /// plugin's config creator fails for a URL ambiguously claimed by
    /// multiple plugins.
    pub fn for_entrypoint(&self, url: &str, blacklist: &[String]) -> Result<&Arc<dyn Plugin>, HydrocarbonError> {
        let probe = Config::new(vec![url.to_string()], serde_json::Value::Null);
        self.plugins
            .iter()
            .find(|p| !blacklist.iter().any(|b| b == p.name()) && p.validate_config(&probe).is_ok())
            .ok_or(HydrocarbonError::NoPluginFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, _cx: &Context, _opts: &HandlerOpts, _task: Task) -> Result<HandlerResponse, TaskError> {
            Ok(HandlerResponse::default())
        }
    }

    struct FixturePlugin {
        routes: Vec<Route>,
    }

    #[async_trait]
    impl Plugin for FixturePlugin {
        fn name(&self) -> &str {
            "fixture"
        }

        fn validate_config(&self, config: &Config) -> Result<(), HydrocarbonError> {
            if config.entrypoints.iter().all(|e| e.starts_with("https://example.com/")) {
                Ok(())
            } else {
                Err(HydrocarbonError::Validation("not an example.com url".into()))
            }
        }

        async fn create_config(&self, url: &str, _opts: &HandlerOpts) -> Result<(String, Config), HydrocarbonError> {
            Ok(("Fixture Feed".to_string(), Config::new(vec![url.to_string()], serde_json::Value::Null)))
        }

        fn propose_schedule(&self, _request: &ScheduleRequest) -> Vec<ScrapeSchedule> {
            Vec::new()
        }

        fn routes(&self) -> &[Route] {
            &self.routes
        }
    }

    fn fixture_plugin() -> FixturePlugin {
        FixturePlugin {
            routes: vec![Route::new(r"^https://example\.com/post/(\d+)$", Arc::new(EchoHandler))],
        }
    }

    #[test]
    fn route_dispatch_captures_positional_params() {
        let plugin = fixture_plugin();
        let (_, params) = route_task(&plugin, "https://example.com/post/42").expect("should match");
        assert_eq!(params, vec!["42".to_string()]);
    }

    #[test]
    fn unmatched_url_has_no_route() {
        let plugin = fixture_plugin();
        assert!(route_task(&plugin, "https://other.com/post/42").is_none());
    }

    #[test]
    fn for_entrypoint_respects_blacklist() {
        let registry = PluginRegistry::new(vec![Arc::new(fixture_plugin())]);
        assert!(registry.for_entrypoint("https://example.com/post/1", &[]).is_ok());
        assert!(registry
            .for_entrypoint("https://example.com/post/1", &["fixture".to_string()])
            .is_err());
    }

    #[test]
    fn for_entrypoint_rejects_unmatched_url() {
        let registry = PluginRegistry::new(vec![Arc::new(fixture_plugin())]);
        assert!(registry.for_entrypoint("https://other.com/1", &[]).is_err());
    }
}
