use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ScrapeError;

/// Status of a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Transitions are monotonic: `pending -> running -> terminal`, with a
    /// direct `pending -> failed/cancelled` shortcut for jobs that never
    /// start (bad config at launch, cancelled before pickup). Terminal
    /// states have no outgoing transitions.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Progress counters for a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Pages fetched successfully.
    pub urls_visited: u64,
    /// Records parsed and handed to the sink.
    pub records_found: u64,
    /// Per-URL and per-record errors absorbed by the job.
    pub errors: u64,
    /// URLs skipped because robots.txt denied them (or was unavailable).
    pub blocked: u64,
}

/// Read-only view of a job, safe to hand to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub site_key: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Shared, mutex-guarded state of a single scrape job.
///
/// Owned by the orchestrator task for the duration of the run; external
/// callers only ever see [`JobSnapshot`] clones. All locks are held for
/// plain field reads/writes and never across an await point.
#[derive(Debug)]
pub struct JobState {
    pub id: Uuid,
    pub site_key: String,
    status: Mutex<JobStatus>,
    progress: Mutex<Progress>,
    error_message: Mutex<Option<String>>,
    created_at: DateTime<Utc>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl JobState {
    pub fn new(id: Uuid, site_key: impl Into<String>) -> Self {
        Self {
            id,
            site_key: site_key.into(),
            status: Mutex::new(JobStatus::Pending),
            progress: Mutex::new(Progress::default()),
            error_message: Mutex::new(None),
            created_at: Utc::now(),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    /// Move the job to `next`, enforcing the state machine.
    ///
    /// Records `started_at` on entering `running` and `finished_at` on
    /// entering any terminal state.
    pub fn transition(&self, next: JobStatus) -> Result<(), ScrapeError> {
        let mut status = self.status.lock().unwrap();
        if !status.can_transition_to(next) {
            return Err(ScrapeError::InvalidTransition {
                from: *status,
                to: next,
            });
        }
        *status = next;
        drop(status);

        let now = Utc::now();
        if next == JobStatus::Running {
            *self.started_at.lock().unwrap() = Some(now);
        }
        if next.is_terminal() {
            *self.finished_at.lock().unwrap() = Some(now);
        }
        Ok(())
    }

    /// Transition to `failed` and record the reason.
    pub fn fail(&self, message: impl Into<String>) -> Result<(), ScrapeError> {
        *self.error_message.lock().unwrap() = Some(message.into());
        self.transition(JobStatus::Failed)
    }

    /// Request cooperative cancellation. The fetch loop observes the token
    /// at the top of each iteration; in-flight fetches finish but their
    /// results are discarded.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn record_page(&self, records: u64, parse_errors: u64) {
        let mut p = self.progress.lock().unwrap();
        p.urls_visited += 1;
        p.records_found += records;
        p.errors += parse_errors;
    }

    pub fn record_error(&self) {
        self.progress.lock().unwrap().errors += 1;
    }

    pub fn record_blocked(&self) {
        self.progress.lock().unwrap().blocked += 1;
    }

    pub fn progress(&self) -> Progress {
        *self.progress.lock().unwrap()
    }

    /// Consistent point-in-time snapshot of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            site_key: self.site_key.clone(),
            status: self.status(),
            progress: self.progress(),
            error_message: self.error_message.lock().unwrap().clone(),
            created_at: self.created_at,
            started_at: *self.started_at.lock().unwrap(),
            finished_at: *self.finished_at.lock().unwrap(),
        }
    }
}
