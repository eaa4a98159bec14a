use uuid::Uuid;

use crate::job::JobStatus;

/// Application-wide error types for Domus.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    /// Site configuration missing or invalid at launch. Fails the job
    /// before any fetch is made.
    #[error("invalid site config: {0}")]
    ConfigInvalid(String),

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// The record sink rejected an emitted record.
    #[error("sink error: {0}")]
    Sink(String),

    /// A job with this id is already registered with the engine.
    #[error("job {0} already exists")]
    DuplicateJob(Uuid),

    /// Attempted an illegal job status transition.
    #[error("illegal job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl ScrapeError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Network(_) | ScrapeError::Timeout(_) => true,
            ScrapeError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
