use thiserror::Error;

/// Error kinds shared across the Discollector and its store.
///
/// Mirrors the taxonomy in the spec's error handling design: transient
/// failures are retried, permanent failures are recorded and dropped.
#[derive(Error, Debug)]
pub enum HydrocarbonError {
    #[error("database error: {0}")]
    Database(String),

    #[error("scraping error: {0}")]
    Scraping(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no route matched task url")]
    RouteNotMatched,

    #[error("plugin contract violation: {0}")]
    PluginContractViolation(String),

    #[error("no plugin found for entrypoint")]
    NoPluginFound,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HydrocarbonError>;

/// The kind of error a task or handler produced, used to decide whether
/// the Scrape Runner retries, rate-limit-delays, or drops the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP >= 500, network I/O, timeouts, parse errors. Retried up to
    /// `max_task_retries`.
    Transient,
    /// HTTP 4xx (except 429), route-match failure, handler contract
    /// violation. Recorded and dropped, does not retry.
    Permanent,
    /// HTTP 429 or explicit Retry-After. Re-enqueued with delay, does not
    /// consume the task's retry budget.
    RateLimited,
}

/// An error produced while processing a single task. Carries enough
/// context for the Scrape Runner to log and, if the budget is exhausted,
/// append to the scrape's error list.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self { kind: ErrorKind::Transient, message: message.into() }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self { kind: ErrorKind::Permanent, message: message.into() }
    }

    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self { kind: ErrorKind::RateLimited, message: message.into() }
    }
}
