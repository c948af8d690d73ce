//! End-to-end scrape lifecycle scenarios against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hydrocarbon_common::{Config, PostFact, Scrape, ScheduleRequest, ScrapeSchedule, Task, TaskError};
use hydrocarbon_core::registry::{Context, Handler, HandlerOpts, HandlerResponse, Plugin, Route};
use hydrocarbon_core::testing::MemoryStore;
use hydrocarbon_core::{run_scrape, FactWriter, HttpClient, RateLimiter, Store};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a scripted handler does the first time (and, for `fail_then_succeed`,
/// every time after) it sees a given URL.
#[derive(Clone)]
enum Step {
    Emit { facts: Vec<PostFact>, tasks: Vec<Task> },
    FailThenSucceed { fails_remaining: u32, facts: Vec<PostFact> },
    AlwaysFail,
}

struct ScriptedHandler {
    script: HashMap<String, Step>,
    visits: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn handle(&self, _cx: &Context, _opts: &HandlerOpts, task: Task) -> Result<HandlerResponse, TaskError> {
        let mut visits = self.visits.lock().await;
        let count = visits.entry(task.url.clone()).or_insert(0);
        *count += 1;

        match self.script.get(&task.url) {
            Some(Step::Emit { facts, tasks }) => {
                Ok(HandlerResponse { facts: facts.iter().cloned().map(hydrocarbon_common::Fact::Post).collect(), tasks: tasks.clone() })
            }
            Some(Step::FailThenSucceed { fails_remaining, facts }) => {
                if *count <= *fails_remaining {
                    Err(TaskError::transient(format!("simulated failure {count}")))
                } else {
                    Ok(HandlerResponse { facts: facts.iter().cloned().map(hydrocarbon_common::Fact::Post).collect(), tasks: vec![] })
                }
            }
            Some(Step::AlwaysFail) => Err(TaskError::transient("always fails")),
            None => Err(TaskError::permanent(format!("unscripted url: {}", task.url))),
        }
    }
}

struct ScriptedPlugin {
    routes: Vec<Route>,
}

impl ScriptedPlugin {
    fn new(script: HashMap<String, Step>) -> Self {
        let handler = Arc::new(ScriptedHandler { script, visits: Mutex::new(HashMap::new()) });
        let route = Route::new(r"^mem://.*$", handler);
        Self { routes: vec![route] }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        "scripted"
    }

    fn validate_config(&self, config: &Config) -> Result<(), hydrocarbon_common::HydrocarbonError> {
        if config.entrypoints.iter().all(|e| e.starts_with("mem://")) {
            Ok(())
        } else {
            Err(hydrocarbon_common::HydrocarbonError::Validation("not a mem:// url".into()))
        }
    }

    async fn create_config(&self, url: &str, _opts: &HandlerOpts) -> Result<(String, Config), hydrocarbon_common::HydrocarbonError> {
        Ok(("Scripted Feed".to_string(), Config::new(vec![url.to_string()], serde_json::Value::Null)))
    }

    fn propose_schedule(&self, _request: &ScheduleRequest) -> Vec<ScrapeSchedule> {
        Vec::new()
    }

    fn routes(&self) -> &[Route] {
        &self.routes
    }
}

fn http_client() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(Arc::new(RateLimiter::new(100, 100))))
}

fn post(url: &str) -> PostFact {
    PostFact { title: "t".into(), author: "a".into(), body: "b".into(), url: url.into(), posted_at: Utc::now() }
}

fn waiting_scrape(feed_id: Uuid, config: Config) -> Scrape {
    Scrape::new_waiting(feed_id, "scripted".into(), config, Utc::now())
}

#[tokio::test]
async fn seeded_entrypoint_produces_a_fact() {
    let mut script = HashMap::new();
    script.insert("mem://list".to_string(), Step::Emit { facts: vec![post("mem://post/1")], tasks: vec![] });
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(script));

    let store = Arc::new(MemoryStore::new());
    let fact_writer = Arc::new(FactWriter::new(store.clone() as Arc<dyn Store>));
    let scrape = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://list".to_string()], serde_json::Value::Null));

    let outcome = run_scrape(&scrape, plugin, http_client(), fact_writer, 4, 3, 10, 1000, CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.counters.total_datums, 1);
    assert_eq!(store.post_count().await, 1);
}

#[tokio::test]
async fn child_tasks_are_drained_before_the_scrape_finishes() {
    let mut script = HashMap::new();
    script.insert(
        "mem://list".to_string(),
        Step::Emit { facts: vec![], tasks: vec![Task::new("mem://detail/1"), Task::new("mem://detail/2")] },
    );
    script.insert("mem://detail/1".to_string(), Step::Emit { facts: vec![post("mem://post/1")], tasks: vec![] });
    script.insert("mem://detail/2".to_string(), Step::Emit { facts: vec![post("mem://post/2")], tasks: vec![] });
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(script));

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let fact_writer = Arc::new(FactWriter::new(store.clone()));
    let scrape = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://list".to_string()], serde_json::Value::Null));

    let outcome = run_scrape(&scrape, plugin, http_client(), fact_writer, 4, 3, 10, 1000, CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.counters.total_datums, 2);
    assert_eq!(outcome.counters.total_tasks, 3);
}

#[tokio::test]
async fn a_transient_failure_retries_and_then_succeeds() {
    let mut script = HashMap::new();
    script.insert(
        "mem://flaky".to_string(),
        Step::FailThenSucceed { fails_remaining: 2, facts: vec![post("mem://post/1")] },
    );
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(script));

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let fact_writer = Arc::new(FactWriter::new(store.clone()));
    let scrape = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://flaky".to_string()], serde_json::Value::Null));

    let outcome = run_scrape(&scrape, plugin, http_client(), fact_writer, 1, 5, 10, 1000, CancellationToken::new()).await;

    assert!(outcome.success);
    assert_eq!(outcome.counters.total_datums, 1);
    assert_eq!(outcome.counters.total_retries, 2);
}

#[tokio::test]
async fn retries_exhaust_and_the_scrape_errors() {
    let mut script = HashMap::new();
    script.insert("mem://broken".to_string(), Step::AlwaysFail);
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(script));

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let fact_writer = Arc::new(FactWriter::new(store.clone()));
    let scrape = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://broken".to_string()], serde_json::Value::Null));

    let outcome = run_scrape(&scrape, plugin, http_client(), fact_writer, 1, 2, 10, 1000, CancellationToken::new()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn duplicate_content_across_feeds_is_written_once() {
    let mut script = HashMap::new();
    script.insert("mem://a".to_string(), Step::Emit { facts: vec![post("mem://shared")], tasks: vec![] });
    script.insert("mem://b".to_string(), Step::Emit { facts: vec![post("mem://shared")], tasks: vec![] });
    let plugin: Arc<dyn Plugin> = Arc::new(ScriptedPlugin::new(script));

    let store = Arc::new(MemoryStore::new());
    let fact_writer = Arc::new(FactWriter::new(store.clone() as Arc<dyn Store>));

    let scrape_a = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://a".to_string()], serde_json::Value::Null));
    run_scrape(&scrape_a, plugin.clone(), http_client(), fact_writer.clone(), 1, 1, 10, 1000, CancellationToken::new()).await;

    let scrape_b = waiting_scrape(Uuid::new_v4(), Config::new(vec!["mem://b".to_string()], serde_json::Value::Null));
    run_scrape(&scrape_b, plugin, http_client(), fact_writer, 1, 1, 10, 1000, CancellationToken::new()).await;

    assert_eq!(store.post_count().await, 1);
}

#[tokio::test]
async fn concurrent_claims_never_double_assign_a_scrape() {
    let store = MemoryStore::new();
    let feed_id = Uuid::new_v4();
    let scrape = waiting_scrape(feed_id, Config::new(vec!["mem://only".to_string()], serde_json::Value::Null));
    store.seed_scrape(scrape.clone()).await;

    let store = Arc::new(store);
    let a = store.clone();
    let b = store.clone();
    let (left, right) = tokio::join!(
        tokio::spawn(async move { Store::start_scrapes(a.as_ref(), 1).await.unwrap() }),
        tokio::spawn(async move { Store::start_scrapes(b.as_ref(), 1).await.unwrap() }),
    );

    let total_claimed = left.unwrap().len() + right.unwrap().len();
    assert_eq!(total_claimed, 1);
}
