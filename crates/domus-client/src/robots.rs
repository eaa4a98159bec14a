//! Per-domain robots.txt policy cache.
//!
//! Fetches `robots.txt` once per domain per TTL window and shares the
//! parsed policy across all concurrent jobs. Fail-closed: if the file
//! cannot be fetched, every path on that domain is denied until the cache
//! entry expires and a fresh fetch succeeds.

use std::sync::Arc;
use std::time::Duration;

use domus_core::models::FetchStatus;
use domus_core::traits::{Fetcher, RobotsGate};
use domus_core::util::domain_key;
use robotstxt::DefaultMatcher;

/// Cached policy for one domain.
#[derive(Debug, Clone)]
enum RobotsEntry {
    /// Raw robots.txt body, evaluated per-URL with the Google matcher.
    Rules(Arc<str>),
    /// robots.txt could not be loaded: deny everything (fail-closed).
    DeniedAll,
}

#[derive(Debug, Clone)]
pub struct RobotsConfig {
    /// How long a fetched policy (or a fail-closed denial) stays valid.
    pub ttl: Duration,
    /// Maximum number of domains cached at once.
    pub max_domains: u64,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_domains: 1_000,
        }
    }
}

/// Shared robots.txt gate backed by a TTL cache.
///
/// Concurrent lookups for the same uncached domain coalesce into a single
/// robots.txt fetch (`moka` dedups the loader per key), so a burst of jobs
/// on one domain costs one network call per TTL window.
#[derive(Clone)]
pub struct RobotsCache<F: Fetcher> {
    fetcher: F,
    agent_token: String,
    cache: moka::future::Cache<String, RobotsEntry>,
}

impl<F: Fetcher> RobotsCache<F> {
    /// `user_agent` is the full header value (`BotName/Version (+contact)`);
    /// rule matching uses only the product token before the first `/`, since
    /// that is what `User-agent:` lines in robots.txt name.
    pub fn new(fetcher: F, user_agent: impl Into<String>, config: RobotsConfig) -> Self {
        let user_agent = user_agent.into();
        let agent_token = user_agent
            .split('/')
            .next()
            .unwrap_or(&user_agent)
            .trim()
            .to_string();
        Self {
            fetcher,
            agent_token,
            cache: moka::future::Cache::builder()
                .time_to_live(config.ttl)
                .max_capacity(config.max_domains)
                .build(),
        }
    }

    /// Resolve the policy for a domain key (`scheme://host:port`), fetching
    /// robots.txt on a cache miss or after TTL expiry.
    async fn resolve(&self, origin: &str) -> RobotsEntry {
        self.cache
            .get_with(origin.to_string(), async {
                let robots_url = format!("{origin}/robots.txt");
                let outcome = self.fetcher.fetch(&robots_url).await;
                match outcome.status {
                    FetchStatus::Success { body, .. } => {
                        tracing::info!(url = %robots_url, "Loaded robots.txt");
                        RobotsEntry::Rules(body.into())
                    }
                    FetchStatus::ClientError { code } => {
                        tracing::warn!(
                            url = %robots_url, status = code,
                            "robots.txt unavailable, blocking all requests to domain (fail-closed)"
                        );
                        RobotsEntry::DeniedAll
                    }
                    FetchStatus::Exhausted { reason } => {
                        tracing::warn!(
                            url = %robots_url, %reason,
                            "robots.txt unavailable, blocking all requests to domain (fail-closed)"
                        );
                        RobotsEntry::DeniedAll
                    }
                }
            })
            .await
    }
}

impl<F: Fetcher> RobotsGate for RobotsCache<F> {
    async fn allowed(&self, url: &str) -> bool {
        let Some(origin) = domain_key(url) else {
            return false;
        };
        match self.resolve(&origin).await {
            RobotsEntry::DeniedAll => {
                tracing::warn!(%url, "Blocked: robots.txt not loaded (fail-closed)");
                false
            }
            RobotsEntry::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                let allowed = matcher.one_agent_allowed_by_robots(&body, &self.agent_token, url);
                if !allowed {
                    tracing::info!(%url, "Blocked by robots.txt");
                }
                allowed
            }
        }
    }
}
