use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A parsed listing record, handed to the [`RecordSink`](crate::traits::RecordSink).
///
/// The well-known fields cover what every site exposes; anything else the
/// site config extracts lands in `attributes` under its configured name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// URL of the page this record was parsed from.
    pub source_url: String,
    pub title: Option<String>,
    pub price: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Raw site-defined fields (typology, energy certificate, ...).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Record {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    /// Assign a named field, routing the well-known names to their struct
    /// fields and everything else to `attributes`.
    pub fn set_field(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = Some(value),
            "price" => self.price = Some(value),
            "location" | "address" => self.location = Some(value),
            "description" => self.description = Some(value),
            _ => {
                self.attributes.insert(name.to_string(), value);
            }
        }
    }
}

/// Terminal classification of a fetch, after any internal retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// 2xx with a body.
    Success { code: u16, body: String },
    /// 4xx other than 429 — not retried.
    ClientError { code: u16 },
    /// Retriable failures (429/5xx/transport) that survived every retry.
    Exhausted { reason: String },
}

/// Result of fetching one URL.
///
/// A failed fetch is ordinary data for the orchestrator (it feeds the job
/// error counter), so this is returned by value rather than as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub url: String,
    /// Total request attempts made, including the successful one.
    pub attempts: u32,
    pub status: FetchStatus,
}

impl FetchOutcome {
    pub fn success(url: impl Into<String>, code: u16, body: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.into(),
            attempts,
            status: FetchStatus::Success {
                code,
                body: body.into(),
            },
        }
    }

    pub fn client_error(url: impl Into<String>, code: u16, attempts: u32) -> Self {
        Self {
            url: url.into(),
            attempts,
            status: FetchStatus::ClientError { code },
        }
    }

    pub fn exhausted(url: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.into(),
            attempts,
            status: FetchStatus::Exhausted {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FetchStatus::Success { .. })
    }

    pub fn body(&self) -> Option<&str> {
        match &self.status {
            FetchStatus::Success { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Output of parsing one page against a site config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub records: Vec<Record>,
    /// Next pagination URL, already resolved against the page URL.
    pub next_url: Option<String>,
    /// Listing elements skipped because a required field was missing.
    pub skipped: u64,
}
