//! HTTP-facing half of the Domus scraper: the reqwest fetcher with retry
//! and backoff, the shared robots.txt policy cache, and the CSS-selector
//! page parser. Everything here implements the traits from `domus-core`,
//! so the engine stays testable without a network.

pub mod fetcher;
pub mod parser;
pub mod robots;

pub use fetcher::{FetchPolicy, ReqwestFetcher};
pub use parser::SelectorParser;
pub use robots::{RobotsCache, RobotsConfig};
