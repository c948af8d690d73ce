//! Per-host rate limiting. Handlers acquire a token before issuing an
//! outbound request through the HTTP client wrapper (see `http_client`).

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use tokio_util::sync::CancellationToken;

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// A per-host token bucket: `rps` sustained, `burst` peak, matching the
/// spec's default of 4 req/s sustained with a burst of 8.
pub struct RateLimiter {
    inner: KeyedLimiter,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(rps.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = Quota::per_second(rps).allow_burst(burst);
        Self { inner: GovernorLimiter::keyed(quota) }
    }

    /// Block until a token for `host` is available, or the cancellation
    /// token fires first.
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            match self.inner.check_key(&host.to_string()) {
                Ok(()) => return Ok(()),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => continue,
                        _ = cancel.cancelled() => return Err(Cancelled),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(4, 2);
        let cancel = CancellationToken::new();
        // Burst of 2 should be immediate.
        limiter.acquire("example.com", &cancel).await.unwrap();
        limiter.acquire("example.com", &cancel).await.unwrap();
        // Different host is unaffected by example.com's bucket.
        limiter.acquire("other.com", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire("slow.com", &cancel).await.unwrap();
        cancel.cancel();
        let result = limiter.acquire("slow.com", &cancel).await;
        assert!(result.is_err());
    }
}
