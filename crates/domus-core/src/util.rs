use url::Url;

/// Extract the sharing key for a URL's domain (scheme://host:port).
///
/// Used to key both the robots policy cache and the per-domain rate
/// limiter, so `https://example.com/a` and `https://example.com/b` share
/// state while `http://example.com` does not.
pub fn domain_key(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let host = url.host_str()?;
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{}{}", url.scheme(), host, port))
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

/// Uniform-ish random value in `[0, max_ms)`. Not crypto, good enough for
/// request-timing jitter.
pub fn rand_range_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
