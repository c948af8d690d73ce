use std::env;

/// Application configuration loaded from environment variables. No config
/// files — every deployable binary reads its settings from the process
/// environment, per the spec's configuration surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    // Worker process
    pub worker_pool_size: usize,
    pub poll_interval_secs: u64,
    pub scheduler_interval_secs: u64,

    // Per-scrape resource caps
    pub max_task_retries: u32,
    pub max_queued_tasks: usize,
    pub max_concurrency_per_scrape: usize,
    pub max_scrape_errors: usize,
    pub scheduler_batch_size: i64,
    pub scheduler_history_limit: i64,

    // Rate limiter
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,

    // HTTP API
    pub http_listen_addr: String,
}

impl Config {
    /// Load config for the worker binary (Worker Pool + Scheduler loops).
    pub fn worker_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", num_cpus()),
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", 5),
            scheduler_interval_secs: env_parse("SCHEDULER_INTERVAL_SECS", 60),
            max_task_retries: env_parse("MAX_TASK_RETRIES", 3),
            max_queued_tasks: env_parse("MAX_QUEUED_TASKS", 10_000),
            max_concurrency_per_scrape: env_parse("MAX_CONCURRENCY_PER_SCRAPE", 4),
            max_scrape_errors: env_parse("MAX_SCRAPE_ERRORS", 50),
            scheduler_batch_size: env_parse("SCHEDULER_BATCH_SIZE", 100),
            scheduler_history_limit: env_parse("SCHEDULER_HISTORY_LIMIT", 10),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", 4),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 8),
            http_listen_addr: String::new(),
        }
    }

    /// Load config for the API binary (HTTP surface only).
    pub fn api_from_env() -> Self {
        let host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("API_PORT").unwrap_or_else(|_| "8080".to_string());
        Self {
            database_url: required_env("DATABASE_URL"),
            worker_pool_size: 0,
            poll_interval_secs: 0,
            scheduler_interval_secs: 0,
            max_task_retries: 0,
            max_queued_tasks: 0,
            max_concurrency_per_scrape: 0,
            max_scrape_errors: 0,
            scheduler_batch_size: 0,
            scheduler_history_limit: 0,
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", 4),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 8),
            http_listen_addr: format!("{host}:{port}"),
        }
    }

    /// Log the shape (not the value) of sensitive config for debugging.
    pub fn log_redacted(&self) {
        if self.database_url.is_empty() {
            tracing::info!("DATABASE_URL = (empty)");
        } else {
            tracing::info!("DATABASE_URL = ({} chars)", self.database_url.len());
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
