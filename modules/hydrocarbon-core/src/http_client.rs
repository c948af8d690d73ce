//! HTTP client wrapper: rate-limits outbound fetches per host, sets a
//! crawler user-agent, and always drains/closes the response body.

use std::sync::Arc;

use hydrocarbon_common::{HydrocarbonError, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::limiter::RateLimiter;

const USER_AGENT: &str = concat!("HydrocarbonBot/", env!("CARGO_PKG_VERSION"), " (+feed aggregator)");

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("non-2xx response: {status}")]
    Status { status: u16, retry_after: Option<u64> },
    #[error("request error: {0}")]
    Request(String),
    #[error("cancelled")]
    Cancelled,
}

pub struct HttpClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl HttpClient {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build reqwest client");
        Self { client, limiter }
    }

    /// Fetch `url` as text, rate-limited by host. Drains the response body
    /// before returning even when the status is non-2xx, so connections
    /// are always returned to the pool.
    pub async fn get_text(&self, url: &str, cancel: &CancellationToken) -> std::result::Result<String, HttpError> {
        let host = host_of(url);

        self.limiter
            .acquire(&host, cancel)
            .await
            .map_err(|_| HttpError::Cancelled)?;

        info!(url, "fetching");

        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.map_err(|e| HttpError::Request(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        // Always drain the body, even on a non-2xx response, so the
        // connection is returned to the pool rather than dropped mid-read.
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(url, status = status.as_u16(), "non-2xx response");
            return Err(HttpError::Status { status: status.as_u16(), retry_after });
        }

        Ok(body)
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

impl From<HttpError> for HydrocarbonError {
    fn from(e: HttpError) -> Self {
        HydrocarbonError::Scraping(e.to_string())
    }
}
