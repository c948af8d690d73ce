use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hydrocarbon_common::Config;
use hydrocarbon_core::{HttpClient, PluginRegistry, RateLimiter, Scheduler, WorkerPool, WorkerPoolConfig};
use hydrocarbon_plugin_feed::FeedPlugin;
use hydrocarbon_plugin_forum::ForumPlugin;
use hydrocarbon_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hydrocarbon=info".parse()?))
        .init();

    info!("hydrocarbon worker starting");

    let config = Config::worker_from_env();
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let registry = Arc::new(PluginRegistry::new(vec![Arc::new(FeedPlugin::new()), Arc::new(ForumPlugin::new())]));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst));
    let http = Arc::new(HttpClient::new(limiter));

    let pool = WorkerPool::new(
        store.clone(),
        registry.clone(),
        http,
        WorkerPoolConfig {
            pool_size: config.worker_pool_size,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_concurrency_per_scrape: config.max_concurrency_per_scrape,
            max_task_retries: config.max_task_retries,
            max_scrape_errors: config.max_scrape_errors,
            max_queued_tasks: config.max_queued_tasks,
        },
    );

    let scheduler = Scheduler::new(
        store,
        registry,
        config.scheduler_batch_size as usize,
        config.scheduler_history_limit as usize,
        Duration::from_secs(config.scheduler_interval_secs),
    );

    let cancel = tokio_util::sync::CancellationToken::new();
    let pool_cancel = cancel.clone();
    let scheduler_cancel = cancel.clone();
    let shutdown_cancel = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        }
    });

    let (pool_result, scheduler_result) =
        tokio::join!(async move { pool.run(pool_cancel).await }, async move { scheduler.run(scheduler_cancel).await });

    pool_result?;
    scheduler_result?;

    info!("hydrocarbon worker stopped");
    Ok(())
}
