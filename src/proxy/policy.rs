//! Caching policy
//!
//! Decides from origin response headers whether a response may be cached,
//! when a cached entry needs revalidation, and which headers are kept.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use chrono::DateTime;

use crate::cache::{CacheStore, ContentEntry, MAX_TTL};

/// Connection-scoped headers never forwarded in either direction
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// == Cachability ==
/// Verdict on an origin response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cachability {
    pub cachable: bool,
    /// Content type reported by the origin, empty when absent
    pub content_type: String,
    /// `max-age` in seconds, 0 when absent or unparsable
    pub max_age: u64,
}

/// Analyzes response headers.
///
/// A response is cachable only if `Cache-Control` carries `public` and the
/// store accepts its content type. `private`, `no-store` and `no-cache`
/// always win.
pub fn analyze(headers: &HeaderMap, store: &dyn CacheStore) -> Cachability {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut public = false;
    let mut forbidden = false;
    let mut max_age = 0;

    for value in headers.get_all(header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let directive = directive.trim();
            let lower = directive.to_ascii_lowercase();
            match lower.as_str() {
                "public" => public = true,
                "private" | "no-store" | "no-cache" => forbidden = true,
                _ => {
                    if let Some(seconds) = lower.strip_prefix("max-age=") {
                        max_age = parse_max_age(seconds);
                    }
                }
            }
        }
    }

    let cachable =
        public && !forbidden && !content_type.is_empty() && store.is_cachable(&content_type);

    Cachability {
        cachable,
        content_type,
        max_age,
    }
}

/// Parses a `max-age` value, capped at `MAX_TTL`. Digits too large for a
/// `u64` saturate, anything else counts as 0.
fn parse_max_age(value: &str) -> u64 {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    value.parse::<u64>().unwrap_or(MAX_TTL).min(MAX_TTL)
}

/// Returns true when a cached entry must be confirmed with the origin.
///
/// An entry without a timestamp is always revalidated.
pub fn should_validate(entry: &ContentEntry, interval: Duration, now: i64) -> bool {
    let cached_at = entry.cached_at();
    if cached_at == 0 {
        return true;
    }
    let interval = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX);
    now > cached_at.saturating_add(interval)
}

// == Headers ==
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Snapshot of response headers kept with a cached entry.
///
/// Keeps the first value of each header and drops hop-by-hop headers,
/// `Set-Cookie` and values that are not valid text.
pub fn clean_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cleaned = HashMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::SET_COOKIE {
            continue;
        }
        if let Ok(value) = value.to_str() {
            cleaned
                .entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cleaned
}

/// Rebuilds a header map from a cached snapshot, skipping invalid pairs.
pub fn restore_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut restored = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            restored.insert(name, value);
        }
    }
    restored
}

/// Formats a Unix timestamp as an HTTP date, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(timestamp: i64) -> Option<HeaderValue> {
    let date = DateTime::from_timestamp(timestamp, 0)?;
    HeaderValue::from_str(&date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}
