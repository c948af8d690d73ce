//! Worker Pool: the outer loop that claims ready scrapes and drives a
//! Scrape Runner for each one.
//!
//! Each iteration claims up to `pool_size` `WAITING` scrapes whose
//! `scheduled_start_at` has passed (via `Store::start_scrapes`, which is
//! responsible for the atomic claim), runs all of them concurrently to
//! completion, persists their outcome, then polls again. An empty claim
//! sleeps for `poll_interval` before retrying.

use std::sync::Arc;

use hydrocarbon_common::{Result, ScrapeState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::fact_writer::FactWriter;
use crate::http_client::HttpClient;
use crate::registry::PluginRegistry;
use crate::runner::run_scrape;
use crate::store::Store;

pub struct WorkerPoolConfig {
    pub pool_size: usize,
    pub poll_interval: std::time::Duration,
    pub max_concurrency_per_scrape: usize,
    pub max_task_retries: u32,
    pub max_scrape_errors: usize,
    pub max_queued_tasks: usize,
}

pub struct WorkerPool {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    http: Arc<HttpClient>,
    fact_writer: Arc<FactWriter>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        http: Arc<HttpClient>,
        config: WorkerPoolConfig,
    ) -> Self {
        let fact_writer = Arc::new(FactWriter::new(store.clone()));
        Self { store, registry, http, fact_writer, config }
    }

    /// Runs until `cancel` fires. Intended to be spawned as its own
    /// task alongside the Scheduler.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let claimed = match self.store.start_scrapes(self.config.pool_size as i64).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(error = %e, "failed to claim scrapes, backing off");
                    Vec::new()
                }
            };
            if claimed.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = cancel.cancelled() => return Ok(()),
                }
                continue;
            }

            info!(count = claimed.len(), "claimed scrapes");

            let mut running = tokio::task::JoinSet::new();
            for scrape in claimed {
                let store = self.store.clone();
                let registry = self.registry.clone();
                let http = self.http.clone();
                let fact_writer = self.fact_writer.clone();
                let process_max_concurrency = self.config.max_concurrency_per_scrape;
                let process_max_task_retries = self.config.max_task_retries;
                let max_scrape_errors = self.config.max_scrape_errors;
                let max_queued_tasks = self.config.max_queued_tasks;
                let scrape_cancel = cancel.clone();

                running.spawn(async move {
                    let scrape_id = scrape.id;
                    let Some(plugin) = registry.by_name(&scrape.plugin).cloned() else {
                        error!(%scrape_id, plugin = scrape.plugin, "no registered plugin for scrape");
                        let _ = store
                            .end_scrape(
                                scrape_id,
                                ScrapeState::Errored,
                                Default::default(),
                                Some(format!("unknown plugin: {}", scrape.plugin)),
                            )
                            .await;
                        return;
                    };

                    let max_concurrency = plugin.max_concurrency().min(process_max_concurrency);
                    let max_task_retries = plugin.max_task_retries().min(process_max_task_retries);

                    let outcome = run_scrape(
                        &scrape,
                        plugin,
                        http,
                        fact_writer,
                        max_concurrency,
                        max_task_retries,
                        max_scrape_errors,
                        max_queued_tasks,
                        scrape_cancel,
                    )
                    .await;

                    let state = if outcome.success { ScrapeState::Success } else { ScrapeState::Errored };
                    let error_summary = (!outcome.errors.is_empty()).then(|| outcome.errors.join("; "));

                    if let Err(e) = store.end_scrape(scrape_id, state, outcome.counters, error_summary).await {
                        warn!(%scrape_id, error = %e, "failed to persist scrape outcome");
                    }
                });
            }

            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "scrape task panicked");
                }
            }
        }
    }
}
