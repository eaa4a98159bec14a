pub mod dedup;
pub mod engine;
pub mod error;
pub mod job;
pub mod limiter;
pub mod models;
pub mod site;
pub mod testutil;
pub mod traits;
pub mod util;

pub use engine::{JobHandle, ScrapeEngine};
pub use error::ScrapeError;
pub use job::{JobSnapshot, JobStatus, Progress};
pub use models::{FetchOutcome, FetchStatus, ParsedPage, Record};
pub use site::{PaginationMode, SiteConfig, StaticSiteProvider};
pub use traits::{Fetcher, NullSink, PageParser, RecordSink, RobotsGate, SiteConfigProvider};
