//! Per-domain request rate limiting for polite fetching.
//!
//! Every request to a domain must wait a randomized minimum delay since the
//! previous request to that domain. The limiter is process-wide and shared
//! across all concurrent jobs; each domain has its own lock slot, so
//! unrelated domains never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::util::rand_range_ms;

/// Delay range between consecutive requests to the same domain.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub min_delay: Duration,
    /// Maximum delay; each wait picks a uniform value in `[min, max]`.
    pub max_delay: Duration,
}

impl RateLimitConfig {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Pick the delay for a single wait (uniform in `[min, max]`).
    fn pick_delay(&self) -> Duration {
        let spread = self.max_delay.saturating_sub(self.min_delay);
        if spread.is_zero() {
            return self.min_delay;
        }
        self.min_delay + Duration::from_millis(rand_range_ms(spread.as_millis() as u64 + 1))
    }
}

impl Default for RateLimitConfig {
    /// 2-5 seconds, the polite default for listing sites.
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        }
    }
}

type DomainSlot = Arc<Mutex<Option<Instant>>>;

/// Enforces the per-domain delay across all concurrent callers.
///
/// Each domain key owns an `Arc<Mutex<Option<Instant>>>` slot holding the
/// last-request time. `await_turn` holds the slot lock across its sleep, so
/// concurrent callers for the same domain serialize instead of both reading
/// a stale timestamp; the outer map lock is only held long enough to clone
/// the slot.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: StdMutex<HashMap<String, DomainSlot>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: StdMutex::new(HashMap::new()),
        }
    }

    fn slot(&self, domain: &str) -> DomainSlot {
        let mut map = self.domains.lock().unwrap();
        Arc::clone(map.entry(domain.to_string()).or_default())
    }

    /// Block until it is safe to issue the next request to `domain`, then
    /// record the new last-request timestamp before returning.
    pub async fn await_turn(&self, domain: &str) {
        let slot = self.slot(domain);
        let mut last = slot.lock().await;

        if let Some(prev) = *last {
            let required = self.config.pick_delay();
            let elapsed = prev.elapsed();
            if elapsed < required {
                let wait = required - elapsed;
                tracing::debug!(
                    domain = %domain,
                    sleep_ms = %wait.as_millis(),
                    "Rate limiting request"
                );
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(min_ms: u64, max_ms: u64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        )))
    }

    #[test]
    fn pick_delay_is_within_range() {
        let config = RateLimitConfig::new(Duration::from_millis(100), Duration::from_millis(150));
        for _ in 0..100 {
            let d = config.pick_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn max_is_clamped_to_min() {
        let config = RateLimitConfig::new(Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn second_request_waits_min_delay() {
        let limiter = limiter(100, 100);
        let start = Instant::now();
        limiter.await_turn("https://example.com:443").await;
        limiter.await_turn("https://example.com:443").await;
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second request should wait at least min_delay, elapsed: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn different_domains_do_not_wait_on_each_other() {
        let limiter = limiter(200, 200);
        let start = Instant::now();
        limiter.await_turn("https://example.com:443").await;
        limiter.await_turn("https://other.com:443").await;
        assert!(
            start.elapsed() < Duration::from_millis(150),
            "unrelated domains should not throttle each other, elapsed: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn concurrent_callers_serialize_per_domain() {
        let limiter = limiter(50, 50);
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.await_turn("https://example.com:443").await;
                Instant::now()
            }));
        }

        let mut finish_times = Vec::new();
        for h in handles {
            finish_times.push(h.await.unwrap());
        }
        finish_times.sort();

        // Three callers, two enforced gaps.
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "three concurrent callers should spread over >= 2 delay windows, elapsed: {:?}",
            start.elapsed()
        );
        for pair in finish_times.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= Duration::from_millis(45),
                "consecutive turns closer than min_delay"
            );
        }
    }
}
