use std::future::Future;

use uuid::Uuid;

use crate::error::ScrapeError;
use crate::models::{FetchOutcome, ParsedPage, Record};
use crate::site::SiteConfig;

/// Fetches one URL, including any internal retries.
///
/// Implementations must send an identifying User-Agent and classify the
/// result; a failed fetch is returned as a [`FetchOutcome`], never as a
/// panic or hidden retry loop in the caller. Stateless with respect to the
/// job: safe to invoke concurrently for different URLs.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = FetchOutcome> + Send;
}

/// Decides whether a URL may be fetched under the domain's robots policy.
///
/// Implementations are fail-closed: if the policy cannot be resolved, the
/// URL is denied.
pub trait RobotsGate: Send + Sync + Clone {
    fn allowed(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// Applies a site's selector configuration to raw page content.
///
/// Pure: no network, no shared mutable state.
pub trait PageParser: Send + Sync + Clone {
    /// Check the config's selectors at job launch, before any fetch.
    fn validate(&self, config: &SiteConfig) -> Result<(), ScrapeError> {
        let _ = config;
        Ok(())
    }

    /// Extract records and the next-page URL from one page. `page_url` is
    /// the URL the page was fetched from, used to resolve relative links.
    fn parse(
        &self,
        html: &str,
        page_url: &str,
        config: &SiteConfig,
    ) -> Result<ParsedPage, ScrapeError>;
}

/// Receives parsed records; implemented by the persistence layer.
pub trait RecordSink: Send + Sync + Clone {
    fn emit(
        &self,
        job_id: Uuid,
        record: Record,
    ) -> impl Future<Output = Result<(), ScrapeError>> + Send;
}

/// Supplies site configurations at job launch; implemented by the
/// site-config store.
pub trait SiteConfigProvider: Send + Sync + Clone {
    fn get(
        &self,
        site_key: &str,
    ) -> impl Future<Output = Result<Option<SiteConfig>, ScrapeError>> + Send;
}

/// A no-op RecordSink for use when records should be discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RecordSink for NullSink {
    async fn emit(&self, _job_id: Uuid, _record: Record) -> Result<(), ScrapeError> {
        Ok(())
    }
}
