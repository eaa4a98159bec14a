use std::time::Duration;

use domus_core::models::FetchOutcome;
use domus_core::traits::Fetcher;
use domus_core::ScrapeError;
use reqwest::Client;

/// Fetch behavior: identity, timeout, and retry policy.
///
/// The User-Agent must identify the bot and carry a contact reference
/// (`BotName/Version (+contact)`); a UA that doesn't follow the format is
/// accepted but logged, since some sites block anonymous clients outright.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub user_agent: String,
    pub timeout: Duration,
    /// Retries after the first attempt, for retriable failures only.
    pub max_retries: u32,
    /// First backoff delay; doubles on each further attempt.
    pub base_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            user_agent: "DomusBot/0.1 (+https://domus.example/bot; contact: ops@domus.example)"
                .to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    /// Loose check for the identifying `BotName/Version (+contact)` form.
    fn is_identifying(&self) -> bool {
        self.user_agent.contains('/') && self.user_agent.contains("(+")
    }
}

/// Backoff delay before retry number `attempt` (1-indexed): the base delay
/// doubled for each previous attempt.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

/// HTTP fetcher using reqwest, with retry and outcome classification.
///
/// Stateless apart from the connection pool: safe to clone and invoke
/// concurrently for different URLs. All failure modes come back as a
/// [`FetchOutcome`]; the caller decides what a failed page means for the
/// job.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    policy: FetchPolicy,
}

impl ReqwestFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self, ScrapeError> {
        if !policy.is_identifying() {
            tracing::warn!(
                user_agent = %policy.user_agent,
                "User-Agent does not follow the identifiable bot format 'BotName/Version (+contact)'"
            );
        }
        let client = Client::builder()
            .user_agent(&policy.user_agent)
            .timeout(policy.timeout)
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;
        Ok(Self { client, policy })
    }

    fn transport_error(&self, e: &reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::Timeout(self.policy.timeout.as_secs())
        } else if e.is_connect() {
            ScrapeError::Network(format!("connection failed: {e}"))
        } else {
            ScrapeError::Network(format!("request error: {e}"))
        }
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let max_attempts = self.policy.max_retries + 1;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.client.get(url).send().await {
                Ok(response) => {
                    let code = response.status().as_u16();
                    if response.status().is_success() {
                        match response.text().await {
                            Ok(body) => return FetchOutcome::success(url, code, body, attempt),
                            Err(e) => ScrapeError::Network(format!("failed to read body: {e}")),
                        }
                    } else {
                        ScrapeError::HttpStatus {
                            status: code,
                            url: url.to_string(),
                        }
                    }
                }
                Err(e) => self.transport_error(&e),
            };

            // Non-retryable statuses (permission errors, not-found, ...) end
            // the fetch immediately; everything else gets the retry budget.
            if let ScrapeError::HttpStatus { status, .. } = &error {
                if !error.is_retryable() {
                    tracing::warn!(%url, status = *status, "HTTP error, not retrying");
                    return FetchOutcome::client_error(url, *status, attempt);
                }
            }

            if attempt >= max_attempts {
                tracing::warn!(%url, attempts = attempt, error = %error, "Retries exhausted");
                return FetchOutcome::exhausted(url, error.to_string(), attempt);
            }

            let delay = backoff_delay(attempt, self.policy.base_backoff);
            tracing::debug!(
                %url, attempt, delay_ms = %delay.as_millis(), error = %error,
                "Retriable failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(2000));
        assert_eq!(backoff_delay(4, base), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // Deep attempt counts must not overflow the shift.
        let d = backoff_delay(200, Duration::from_millis(1));
        assert_eq!(d, Duration::from_millis(1 << 16));
    }

    #[test]
    fn retry_decision_follows_error_retryability() {
        // The loop retries exactly the statuses the error taxonomy marks
        // transient.
        let retryable = |status| {
            ScrapeError::HttpStatus {
                status,
                url: "https://example.com/search".into(),
            }
            .is_retryable()
        };
        assert!(retryable(429));
        assert!(retryable(500));
        assert!(retryable(503));
        assert!(!retryable(301));
        assert!(!retryable(403));
        assert!(!retryable(404));
    }

    #[test]
    fn default_policy_is_identifying() {
        assert!(FetchPolicy::default().is_identifying());
        assert!(
            !FetchPolicy::default()
                .with_user_agent("Mozilla/5.0")
                .is_identifying()
        );
    }
}
