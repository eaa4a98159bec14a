use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ScrapeError;
use crate::traits::SiteConfigProvider;

/// How a site paginates its search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PaginationMode {
    /// Follow the link matched by `next_page_selector`.
    #[default]
    HtmlNext,
    /// Append `?{param}=N` (or `&{param}=N`) to the seed URL.
    QueryParam { param: String },
    /// Append `/N` to the seed URL.
    IncrementalPath,
}

/// Scraping configuration for one site, supplied by the site-config store.
///
/// Immutable input to a job. `field_selectors` maps record field names to
/// CSS selectors evaluated inside each listing element; names listed in
/// `required_fields` must be present or the record is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub key: String,
    pub name: String,
    pub base_url: String,
    pub seed_url: String,
    /// CSS selector matching one element per listing on a results page.
    pub listing_selector: String,
    #[serde(default)]
    pub field_selectors: HashMap<String, String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    #[serde(default)]
    pub pagination: PaginationMode,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_max_pages() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl SiteConfig {
    pub fn new(key: impl Into<String>, base_url: impl Into<String>, seed_url: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            base_url: base_url.into(),
            seed_url: seed_url.into(),
            listing_selector: String::new(),
            field_selectors: HashMap::new(),
            required_fields: Vec::new(),
            next_page_selector: None,
            pagination: PaginationMode::default(),
            max_pages: default_max_pages(),
            is_active: true,
        }
    }

    pub fn with_listing_selector(mut self, selector: impl Into<String>) -> Self {
        self.listing_selector = selector.into();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, selector: impl Into<String>) -> Self {
        self.field_selectors.insert(field.into(), selector.into());
        self
    }

    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    pub fn with_next_page_selector(mut self, selector: impl Into<String>) -> Self {
        self.next_page_selector = Some(selector.into());
        self
    }

    pub fn with_pagination(mut self, mode: PaginationMode) -> Self {
        self.pagination = mode;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Structural validation, run at job launch before any fetch.
    ///
    /// Selector syntax is checked separately by the parser implementation
    /// via [`PageParser::validate`](crate::traits::PageParser::validate).
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.key.trim().is_empty() {
            return Err(ScrapeError::ConfigInvalid("site key is empty".into()));
        }
        if self.listing_selector.trim().is_empty() {
            return Err(ScrapeError::ConfigInvalid(format!(
                "site '{}' has no listing selector",
                self.key
            )));
        }
        if self.max_pages == 0 {
            return Err(ScrapeError::ConfigInvalid(format!(
                "site '{}' has max_pages = 0",
                self.key
            )));
        }
        for field in &self.required_fields {
            if !self.field_selectors.contains_key(field) {
                return Err(ScrapeError::ConfigInvalid(format!(
                    "site '{}' requires field '{field}' but defines no selector for it",
                    self.key
                )));
            }
        }
        for (url, label) in [(&self.base_url, "base_url"), (&self.seed_url, "seed_url")] {
            Url::parse(url).map_err(|e| {
                ScrapeError::ConfigInvalid(format!("site '{}' {label} '{url}': {e}", self.key))
            })?;
        }
        if matches!(self.pagination, PaginationMode::HtmlNext)
            && self.next_page_selector.is_none()
            && self.max_pages > 1
        {
            tracing::debug!(site = %self.key, "html_next pagination without next_page_selector; job will stop after the seed page");
        }
        Ok(())
    }
}

/// Compute the URL of the next results page, or `None` when the job should
/// stop paginating.
///
/// `pages_fetched` is the number of pages already fetched (1 after the seed
/// page), so generated page numbers start at 2.
pub fn next_page_url(
    config: &SiteConfig,
    pages_fetched: u64,
    parsed_next: Option<String>,
) -> Option<String> {
    if pages_fetched >= u64::from(config.max_pages) {
        return None;
    }
    let next_number = pages_fetched + 1;
    match &config.pagination {
        PaginationMode::HtmlNext => parsed_next,
        PaginationMode::QueryParam { param } => {
            let sep = if config.seed_url.contains('?') { '&' } else { '?' };
            Some(format!("{}{}{}={}", config.seed_url, sep, param, next_number))
        }
        PaginationMode::IncrementalPath => Some(format!(
            "{}/{}",
            config.seed_url.trim_end_matches('/'),
            next_number
        )),
    }
}

/// In-memory [`SiteConfigProvider`] backed by a fixed map.
///
/// Stand-in for the external site-config store; also the provider used in
/// tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteProvider {
    configs: Arc<HashMap<String, SiteConfig>>,
}

impl StaticSiteProvider {
    pub fn new(configs: impl IntoIterator<Item = SiteConfig>) -> Self {
        Self {
            configs: Arc::new(
                configs
                    .into_iter()
                    .map(|c| (c.key.clone(), c))
                    .collect(),
            ),
        }
    }
}

impl SiteConfigProvider for StaticSiteProvider {
    async fn get(&self, site_key: &str) -> Result<Option<SiteConfig>, ScrapeError> {
        Ok(self.configs.get(site_key).cloned())
    }
}
