//! The scrape-job execution engine.
//!
//! [`ScrapeEngine`] turns a launch request into a supervised background
//! task: resolve and validate the site config, walk the URL frontier
//! (seed + discovered pagination links), and for each URL run
//! dedup -> robots check -> rate limit -> fetch -> parse -> emit, absorbing
//! per-URL errors into the job's counters. Generic over all external
//! collaborators via traits, enabling dependency injection and testability
//! without real HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dedup::{VisitedSet, normalize_url};
use crate::error::ScrapeError;
use crate::job::{JobSnapshot, JobState, JobStatus};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::models::FetchStatus;
use crate::site::{SiteConfig, next_page_url};
use crate::traits::{Fetcher, PageParser, RecordSink, RobotsGate, SiteConfigProvider};
use crate::util::domain_key;

/// Handle to a launched job: its id, a snapshot view, and the background
/// task itself.
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    state: Arc<JobState>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn snapshot(&self) -> JobSnapshot {
        self.state.snapshot()
    }

    /// Wait for the background task to finish and return the final state.
    pub async fn wait(self) -> JobSnapshot {
        let _ = self.task.await;
        self.state.snapshot()
    }
}

/// Drives scrape jobs as independent background tasks.
///
/// The robots gate and rate limiter are process-wide and shared across all
/// jobs (keyed by domain); everything else is job-scoped.
pub struct ScrapeEngine<F, R, P, S, C>
where
    F: Fetcher,
    R: RobotsGate,
    P: PageParser,
    S: RecordSink,
    C: SiteConfigProvider,
{
    fetcher: F,
    robots: R,
    parser: P,
    sink: S,
    sites: C,
    limiter: Arc<RateLimiter>,
    jobs: Mutex<HashMap<Uuid, Arc<JobState>>>,
}

impl<F, R, P, S, C> ScrapeEngine<F, R, P, S, C>
where
    F: Fetcher + 'static,
    R: RobotsGate + 'static,
    P: PageParser + 'static,
    S: RecordSink + 'static,
    C: SiteConfigProvider + 'static,
{
    pub fn new(fetcher: F, robots: R, parser: P, sink: S, sites: C, limits: RateLimitConfig) -> Self {
        Self {
            fetcher,
            robots,
            parser,
            sink,
            sites,
            limiter: Arc::new(RateLimiter::new(limits)),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a scrape job for `site_key` in the background.
    ///
    /// Returns as soon as the job is running. Configuration problems
    /// (unknown/inactive site, invalid selectors) fail the job here, before
    /// any fetch; the failed job remains visible via [`get_progress`].
    ///
    /// [`get_progress`]: Self::get_progress
    pub async fn launch_job(
        &self,
        job_id: Uuid,
        site_key: &str,
    ) -> Result<JobHandle, ScrapeError> {
        let state = Arc::new(JobState::new(job_id, site_key));
        {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job_id) {
                return Err(ScrapeError::DuplicateJob(job_id));
            }
            jobs.insert(job_id, Arc::clone(&state));
        }

        let config = match self.resolve_config(site_key).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(%job_id, site = %site_key, error = %e, "Job failed at launch");
                state.fail(e.to_string())?;
                return Err(e);
            }
        };

        state.transition(JobStatus::Running)?;
        tracing::info!(%job_id, site = %site_key, seed = %config.seed_url, "Job started");

        let fetcher = self.fetcher.clone();
        let robots = self.robots.clone();
        let parser = self.parser.clone();
        let sink = self.sink.clone();
        let limiter = Arc::clone(&self.limiter);
        let task_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            run_fetch_loop(task_state, config, fetcher, robots, parser, sink, limiter).await;
        });

        Ok(JobHandle {
            id: job_id,
            state,
            task,
        })
    }

    async fn resolve_config(&self, site_key: &str) -> Result<SiteConfig, ScrapeError> {
        let config = self
            .sites
            .get(site_key)
            .await?
            .ok_or_else(|| ScrapeError::ConfigInvalid(format!("site config '{site_key}' not found")))?;
        if !config.is_active {
            return Err(ScrapeError::ConfigInvalid(format!(
                "site config '{site_key}' is inactive"
            )));
        }
        config.validate()?;
        self.parser.validate(&config)?;
        Ok(config)
    }

    /// Request cooperative cancellation of a job.
    ///
    /// The fetch loop observes the flag at the top of its next iteration;
    /// an in-flight fetch completes but its result is discarded. Cancelling
    /// an already-terminal job is a no-op.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let Some(state) = self.job_state(job_id) else {
            return false;
        };
        tracing::info!(%job_id, "Cancellation requested");
        state.request_cancel();
        true
    }

    /// Read-only snapshot of a job's status and counters.
    pub fn get_progress(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.job_state(job_id).map(|s| s.snapshot())
    }

    /// Snapshots of every job the engine knows about.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values().map(|s| s.snapshot()).collect()
    }

    fn job_state(&self, job_id: Uuid) -> Option<Arc<JobState>> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }
}

/// The per-job fetch loop.
///
/// Per-URL failures (robots denial, fetch failure, parse failure, sink
/// rejection) increment counters and continue; only cancellation or
/// frontier exhaustion end the loop.
async fn run_fetch_loop<F, R, P, S>(
    state: Arc<JobState>,
    config: SiteConfig,
    fetcher: F,
    robots: R,
    parser: P,
    sink: S,
    limiter: Arc<RateLimiter>,
) where
    F: Fetcher,
    R: RobotsGate,
    P: PageParser,
    S: RecordSink,
{
    let job_id = state.id;
    let visited = VisitedSet::new();
    let mut frontier: VecDeque<String> = VecDeque::from([config.seed_url.clone()]);
    let mut pages_fetched: u64 = 0;

    while let Some(raw_url) = frontier.pop_front() {
        if state.cancel_requested() {
            finish(&state, JobStatus::Cancelled);
            return;
        }

        let Some(url) = normalize_url(&raw_url) else {
            tracing::warn!(%job_id, url = %raw_url, "Skipping unparseable URL");
            state.record_error();
            continue;
        };

        if !visited.mark_if_new(&url) {
            tracing::debug!(%job_id, %url, "Skipping already visited URL");
            continue;
        }

        if !robots.allowed(&url).await {
            tracing::info!(%job_id, %url, "Blocked by robots policy");
            state.record_blocked();
            continue;
        }

        // normalize_url guarantees a host, so the domain key exists.
        if let Some(domain) = domain_key(&url) {
            limiter.await_turn(&domain).await;
        }

        let outcome = fetcher.fetch(&url).await;

        // A cancel that arrived while the fetch was in flight: the result
        // is discarded, not processed.
        if state.cancel_requested() {
            tracing::debug!(%job_id, %url, "Discarding in-flight fetch result after cancel");
            finish(&state, JobStatus::Cancelled);
            return;
        }

        let body = match &outcome.status {
            FetchStatus::Success { body, .. } => body,
            FetchStatus::ClientError { code } => {
                tracing::warn!(%job_id, %url, status = %code, "Fetch rejected, not retried");
                state.record_error();
                continue;
            }
            FetchStatus::Exhausted { reason } => {
                tracing::warn!(
                    %job_id, %url, attempts = outcome.attempts, %reason,
                    "Fetch failed after retries"
                );
                state.record_error();
                continue;
            }
        };

        let page = match parser.parse(body, &url, &config) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(%job_id, %url, error = %e, "Failed to parse page");
                state.record_error();
                continue;
            }
        };

        pages_fetched += 1;
        let record_count = page.records.len() as u64;
        state.record_page(record_count, page.skipped);
        tracing::info!(
            %job_id, %url, page = pages_fetched,
            records = record_count, skipped = page.skipped,
            "Scraped page"
        );

        for record in page.records {
            if let Err(e) = sink.emit(job_id, record).await {
                tracing::warn!(%job_id, %url, error = %e, "Sink rejected record");
                state.record_error();
            }
        }

        if let Some(next) = next_page_url(&config, pages_fetched, page.next_url) {
            frontier.push_back(next);
        } else {
            tracing::debug!(%job_id, "No more pages");
        }
    }

    finish(&state, JobStatus::Completed);
}

fn finish(state: &JobState, status: JobStatus) {
    if let Err(e) = state.transition(status) {
        tracing::error!(job_id = %state.id, error = %e, "Failed to finalize job status");
        return;
    }
    let p = state.progress();
    tracing::info!(
        job_id = %state.id, status = %status,
        urls_visited = p.urls_visited, records_found = p.records_found,
        errors = p.errors, blocked = p.blocked,
        "Job finished"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{ParsedPage, Record};
    use crate::site::{PaginationMode, StaticSiteProvider};
    use crate::testutil::*;

    type TestEngine =
        ScrapeEngine<MockFetcher, MockRobots, MockParser, MockSink, StaticSiteProvider>;

    fn engine_with(
        fetcher: MockFetcher,
        robots: MockRobots,
        parser: MockParser,
        sink: MockSink,
        configs: Vec<SiteConfig>,
    ) -> TestEngine {
        ScrapeEngine::new(
            fetcher,
            robots,
            parser,
            sink,
            StaticSiteProvider::new(configs),
            RateLimitConfig::new(Duration::from_millis(0), Duration::from_millis(0)),
        )
    }

    fn page_with_records(page_url: &str, count: usize, next: Option<&str>) -> ParsedPage {
        ParsedPage {
            records: (0..count)
                .map(|i| {
                    let mut r = Record::new(page_url);
                    r.set_field("title", format!("Listing {i}"));
                    r
                })
                .collect(),
            next_url: next.map(String::from),
            skipped: 0,
        }
    }

    #[tokio::test]
    async fn job_completes_over_paginated_site() {
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        let parser = MockParser::new()
            .with_page(
                "https://example.com/search",
                page_with_records("https://example.com/search", 2, Some("https://example.com/search?page=2")),
            )
            .with_page(
                "https://example.com/search?page=2",
                page_with_records("https://example.com/search?page=2", 3, None),
            );
        let sink = MockSink::new();
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::allow_all(),
            parser,
            sink.clone(),
            vec![make_site_config("pearls")],
        );

        let job_id = Uuid::new_v4();
        let handle = engine.launch_job(job_id, "pearls").await.unwrap();
        let snap = handle.wait().await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.urls_visited, 2);
        assert_eq!(snap.progress.records_found, 5);
        assert_eq!(snap.progress.errors, 0);
        assert_eq!(sink.records().len(), 5);
        assert_eq!(fetcher.calls().len(), 2);
        assert!(snap.started_at.is_some());
        assert!(snap.finished_at.is_some());
    }

    #[tokio::test]
    async fn pagination_loop_is_broken_by_dedup() {
        // Page 2 links back to page 1; the job must still terminate.
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        let parser = MockParser::new()
            .with_page(
                "https://example.com/search",
                page_with_records("https://example.com/search", 1, Some("https://example.com/search?page=2")),
            )
            .with_page(
                "https://example.com/search?page=2",
                page_with_records("https://example.com/search?page=2", 1, Some("https://example.com/search")),
            );
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::allow_all(),
            parser,
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.urls_visited, 2);
        assert_eq!(fetcher.calls().len(), 2, "each URL fetched at most once");
    }

    #[tokio::test]
    async fn urls_visited_never_exceeds_distinct_enqueued() {
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        let parser = MockParser::new().with_page(
            "https://example.com/search",
            page_with_records("https://example.com/search", 1, Some("https://example.com/search/")),
        );
        let engine = engine_with(
            fetcher,
            MockRobots::allow_all(),
            parser,
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        // The "next" URL normalizes to the seed URL: one distinct URL total.
        assert_eq!(snap.progress.urls_visited, 1);
    }

    #[tokio::test]
    async fn robots_denied_urls_are_counted_blocked_and_not_fetched() {
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::deny_all(),
            MockParser::new(),
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.blocked, 1);
        assert_eq!(snap.progress.urls_visited, 0);
        assert!(fetcher.calls().is_empty(), "no fetch for a denied URL");
    }

    #[tokio::test]
    async fn fetch_failures_increment_errors_without_failing_job() {
        let fetcher =
            MockFetcher::new().with_response("https://example.com/search", MockResponse::client_error(403));
        let engine = engine_with(
            fetcher,
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.errors, 1);
        assert_eq!(snap.progress.urls_visited, 0);
    }

    #[tokio::test]
    async fn sink_errors_are_absorbed() {
        let parser = MockParser::new().with_page(
            "https://example.com/search",
            page_with_records("https://example.com/search", 2, None),
        );
        let sink = MockSink::failing();
        let engine = engine_with(
            MockFetcher::new().with_default_body("<html></html>"),
            MockRobots::allow_all(),
            parser,
            sink,
            vec![make_site_config("pearls")],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.records_found, 2);
        assert_eq!(snap.progress.errors, 2);
    }

    #[tokio::test]
    async fn missing_site_config_fails_job_before_any_fetch() {
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![],
        );

        let job_id = Uuid::new_v4();
        let err = engine.launch_job(job_id, "unknown").await.unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigInvalid(_)));

        let snap = engine.get_progress(job_id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error_message.is_some());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn inactive_site_config_fails_job() {
        let mut config = make_site_config("pearls");
        config.is_active = false;
        let engine = engine_with(
            MockFetcher::new(),
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![config],
        );

        let job_id = Uuid::new_v4();
        assert!(engine.launch_job(job_id, "pearls").await.is_err());
        assert_eq!(
            engine.get_progress(job_id).unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn duplicate_job_id_is_rejected() {
        let engine = engine_with(
            MockFetcher::new().with_default_body("<html></html>"),
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let job_id = Uuid::new_v4();
        let handle = engine.launch_job(job_id, "pearls").await.unwrap();
        let err = engine.launch_job(job_id, "pearls").await.unwrap_err();
        assert!(matches!(err, ScrapeError::DuplicateJob(_)));
        handle.wait().await;
    }

    #[tokio::test]
    async fn cancel_stops_dequeuing_and_discards_in_flight_result() {
        // Slow fetches give the cancel time to land mid-page.
        let fetcher = MockFetcher::new()
            .with_default_body("<html></html>")
            .with_latency(Duration::from_millis(80));
        let parser = MockParser::new().with_page(
            "https://example.com/search",
            page_with_records("https://example.com/search", 1, Some("https://example.com/search?page=2")),
        );
        let sink = MockSink::new();
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::allow_all(),
            parser,
            sink.clone(),
            vec![make_site_config("pearls")],
        );

        let job_id = Uuid::new_v4();
        let handle = engine.launch_job(job_id, "pearls").await.unwrap();

        // Cancel while the first fetch is still in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.cancel_job(job_id));

        let snap = handle.wait().await;
        assert_eq!(snap.status, JobStatus::Cancelled);
        // The in-flight fetch completed but its result was discarded.
        assert_eq!(snap.progress.urls_visited, 0);
        assert!(sink.records().is_empty());
        assert_eq!(fetcher.calls().len(), 1, "no further URLs dequeued");
    }

    #[tokio::test]
    async fn cancel_unknown_job_returns_false() {
        let engine = engine_with(
            MockFetcher::new(),
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![],
        );
        assert!(!engine.cancel_job(Uuid::new_v4()));
        assert!(engine.get_progress(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn list_jobs_includes_finished_and_failed_jobs() {
        let engine = engine_with(
            MockFetcher::new().with_default_body("<html></html>"),
            MockRobots::allow_all(),
            MockParser::new(),
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let ok_id = Uuid::new_v4();
        engine.launch_job(ok_id, "pearls").await.unwrap().wait().await;
        let bad_id = Uuid::new_v4();
        let _ = engine.launch_job(bad_id, "unknown").await;

        let jobs = engine.list_jobs();
        assert_eq!(jobs.len(), 2);
        let by_id = |id| jobs.iter().find(|j| j.id == id).unwrap();
        assert_eq!(by_id(ok_id).status, JobStatus::Completed);
        assert_eq!(by_id(bad_id).status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn query_param_pagination_respects_max_pages() {
        let config = make_site_config("pearls")
            .with_pagination(PaginationMode::QueryParam {
                param: "page".into(),
            })
            .with_max_pages(3);
        let fetcher = MockFetcher::new().with_default_body("<html></html>");
        // Every page parses to one record; pagination is generated, so only
        // max_pages bounds the crawl.
        let parser = MockParser::new().with_default_page(page_with_records("any", 1, None));
        let engine = engine_with(
            fetcher.clone(),
            MockRobots::allow_all(),
            parser,
            MockSink::new(),
            vec![config],
        );

        let snap = engine
            .launch_job(Uuid::new_v4(), "pearls")
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress.urls_visited, 3);
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].ends_with("page=2"));
        assert!(calls[2].ends_with("page=3"));
    }

    #[tokio::test]
    async fn progress_is_observable_while_running() {
        let fetcher = MockFetcher::new()
            .with_default_body("<html></html>")
            .with_latency(Duration::from_millis(50));
        let parser = MockParser::new().with_page(
            "https://example.com/search",
            page_with_records("https://example.com/search", 1, Some("https://example.com/search?page=2")),
        );
        let engine = engine_with(
            fetcher,
            MockRobots::allow_all(),
            parser,
            MockSink::new(),
            vec![make_site_config("pearls")],
        );

        let job_id = Uuid::new_v4();
        let handle = engine.launch_job(job_id, "pearls").await.unwrap();

        let mid = engine.get_progress(job_id).unwrap();
        assert_eq!(mid.status, JobStatus::Running);

        let snap = handle.wait().await;
        assert_eq!(snap.status, JobStatus::Completed);
    }
}
