//! Per-job URL deduplication.
//!
//! Guarantees at most one fetch per URL per job. URLs are canonicalized
//! before the check so trivially-equivalent spellings collapse to one
//! entry.

use std::collections::HashSet;
use std::sync::Mutex;

use url::Url;

/// Canonicalize a URL for deduplication.
///
/// Canonicalization scheme:
/// - scheme and host lowercased (the `url` crate does this on parse)
/// - fragment dropped
/// - query pairs sorted by key, then value; an empty query is dropped
/// - trailing slash trimmed from non-root paths
///
/// Returns `None` for strings that do not parse as absolute URLs.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    url.host_str()?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    Some(url.to_string())
}

/// Set of normalized URLs already fetched within one job.
///
/// Exclusively owned by a single job and discarded when the job ends.
/// Check-and-mark is atomic, so concurrent calls for the same URL admit
/// exactly one caller.
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: Mutex<HashSet<String>>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `normalized` the first time it is seen; returns `true` on the
    /// first call and `false` on every subsequent call for the same URL.
    ///
    /// Callers pass output of [`normalize_url`].
    pub fn mark_if_new(&self, normalized: &str) -> bool {
        self.seen.lock().unwrap().insert(normalized.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().unwrap().is_empty()
    }
}
