//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::error::ScrapeError;
use crate::models::{FetchOutcome, ParsedPage, Record};
use crate::site::SiteConfig;
use crate::traits::{Fetcher, PageParser, RecordSink, RobotsGate};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// One canned fetch response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Ok { code: u16, body: String },
    ClientError { code: u16 },
    Exhausted { reason: String },
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        MockResponse::Ok {
            code: 200,
            body: body.to_string(),
        }
    }

    pub fn client_error(code: u16) -> Self {
        MockResponse::ClientError { code }
    }

    pub fn exhausted(reason: &str) -> Self {
        MockResponse::Exhausted {
            reason: reason.to_string(),
        }
    }

    fn into_outcome(self, url: &str) -> FetchOutcome {
        match self {
            MockResponse::Ok { code, body } => FetchOutcome::success(url, code, body, 1),
            MockResponse::ClientError { code } => FetchOutcome::client_error(url, code, 1),
            MockResponse::Exhausted { reason } => FetchOutcome::exhausted(url, reason, 1),
        }
    }
}

/// Mock fetcher with per-URL response queues and call recording.
///
/// Queued responses for a URL are consumed in order; the last one is
/// sticky. URLs without a queue fall back to the default body (success) or
/// a 404 client error if none was set. An optional latency simulates slow
/// networks for cancellation tests.
#[derive(Clone, Default)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    default_body: Arc<Mutex<Option<String>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`.
    pub fn with_response(self, url: &str, response: MockResponse) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Respond 200 with `body` to any URL without an explicit route.
    pub fn with_default_body(self, body: &str) -> Self {
        *self.default_body.lock().unwrap() = Some(body.to_string());
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// All fetched URLs, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next_response(&self, url: &str) -> MockResponse {
        let mut routes = self.routes.lock().unwrap();
        if let Some(queue) = routes.get_mut(url) {
            if queue.len() > 1 {
                return queue.pop_front().unwrap();
            }
            if let Some(last) = queue.front() {
                return last.clone();
            }
        }
        match self.default_body.lock().unwrap().as_ref() {
            Some(body) => MockResponse::ok(body),
            None => MockResponse::client_error(404),
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.calls.lock().unwrap().push(url.to_string());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.next_response(url).into_outcome(url)
    }
}

// ---------------------------------------------------------------------------
// MockRobots
// ---------------------------------------------------------------------------

/// Mock robots gate with an allow/deny default and per-URL overrides.
#[derive(Clone)]
pub struct MockRobots {
    allow_by_default: bool,
    denied: Arc<Mutex<HashSet<String>>>,
}

impl MockRobots {
    pub fn allow_all() -> Self {
        Self {
            allow_by_default: true,
            denied: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            allow_by_default: false,
            denied: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Deny one exact (normalized) URL on an otherwise-allowing gate.
    pub fn with_denied(self, url: &str) -> Self {
        self.denied.lock().unwrap().insert(url.to_string());
        self
    }
}

impl RobotsGate for MockRobots {
    async fn allowed(&self, url: &str) -> bool {
        if self.denied.lock().unwrap().contains(url) {
            return false;
        }
        self.allow_by_default
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser returning canned [`ParsedPage`]s keyed by page URL.
#[derive(Clone, Default)]
pub struct MockParser {
    pages: Arc<Mutex<HashMap<String, ParsedPage>>>,
    default_page: Arc<Mutex<Option<ParsedPage>>>,
    validate_error: Arc<Mutex<Option<String>>>,
}

impl MockParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page_url: &str, page: ParsedPage) -> Self {
        self.pages.lock().unwrap().insert(page_url.to_string(), page);
        self
    }

    /// Page returned for URLs without an explicit entry (default: empty).
    pub fn with_default_page(self, page: ParsedPage) -> Self {
        *self.default_page.lock().unwrap() = Some(page);
        self
    }

    /// Make `validate` fail, for launch-time selector-error tests.
    pub fn with_validate_error(self, message: &str) -> Self {
        *self.validate_error.lock().unwrap() = Some(message.to_string());
        self
    }
}

impl PageParser for MockParser {
    fn validate(&self, _config: &SiteConfig) -> Result<(), ScrapeError> {
        if let Some(msg) = self.validate_error.lock().unwrap().clone() {
            return Err(ScrapeError::ConfigInvalid(msg));
        }
        Ok(())
    }

    fn parse(
        &self,
        _html: &str,
        page_url: &str,
        _config: &SiteConfig,
    ) -> Result<ParsedPage, ScrapeError> {
        if let Some(page) = self.pages.lock().unwrap().get(page_url) {
            return Ok(page.clone());
        }
        Ok(self
            .default_page
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink that records emitted records, or rejects everything.
#[derive(Clone)]
pub struct MockSink {
    records: Arc<Mutex<Vec<(Uuid, Record)>>>,
    fail: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A sink that rejects every record.
    pub fn failing() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<(Uuid, Record)> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for MockSink {
    async fn emit(&self, job_id: Uuid, record: Record) -> Result<(), ScrapeError> {
        if self.fail {
            return Err(ScrapeError::Sink("sink unavailable".into()));
        }
        self.records.lock().unwrap().push((job_id, record));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A minimal valid site config pointing at example.com.
pub fn make_site_config(key: &str) -> SiteConfig {
    SiteConfig::new(key, "https://example.com", "https://example.com/search")
        .with_listing_selector("div.listing")
        .with_field("title", "h2.title")
        .with_field("price", "span.price")
        .with_next_page_selector("a.next")
}
