//! Content Entry Module
//!
//! Defines the cached representation of one origin response.

use std::collections::HashMap;

use bytes::Bytes;

// == Content Entry ==
/// A cached response: body, content type, header snapshot, TTL and the time
/// it was cached.
///
/// Entries are immutable once built. The only adjustment a store makes is
/// substituting its default TTL when the entry arrives with a TTL of 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    content: Bytes,
    content_type: String,
    headers: HashMap<String, String>,
    ttl: u64,
    cached_at: i64,
}

impl ContentEntry {
    // == Constructor ==
    /// Creates a new entry.
    ///
    /// # Arguments
    /// * `content` - Response body
    /// * `content_type` - Value of the response `Content-Type` header
    /// * `headers` - Snapshot of the response headers to replay on a hit
    /// * `ttl` - TTL in seconds, 0 lets the store pick its default
    /// * `cached_at` - Unix timestamp (seconds) of the fetch
    pub fn new(
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
        headers: HashMap<String, String>,
        ttl: u64,
        cached_at: i64,
    ) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            headers,
            ttl,
            cached_at,
        }
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// TTL in seconds.
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    /// Unix timestamp (seconds) at which the entry was cached, 0 if unknown.
    pub fn cached_at(&self) -> i64 {
        self.cached_at
    }

    /// Size accounted against a memory budget: the body length.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    // == TTL Normalization ==
    /// Replaces a zero TTL with `default_ttl`.
    pub fn with_default_ttl(mut self, default_ttl: u64) -> Self {
        if self.ttl == 0 {
            self.ttl = default_ttl;
        }
        self
    }

    // == Refresh ==
    /// Returns a copy of this entry stamped as cached at `now`.
    ///
    /// Used after the origin confirms a stale copy is still current.
    pub fn refreshed(&self, now: i64) -> Self {
        Self {
            cached_at: now,
            ..self.clone()
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: u64) -> ContentEntry {
        ContentEntry::new("body", "text/css", HashMap::new(), ttl, 1_700_000_000)
    }

    #[test]
    fn test_entry_accessors() {
        let mut headers = HashMap::new();
        headers.insert("Etag".to_string(), "\"abc\"".to_string());
        let e = ContentEntry::new("hello", "image/png", headers, 60, 42);

        assert_eq!(e.content().as_ref(), b"hello");
        assert_eq!(e.content_type(), "image/png");
        assert_eq!(e.headers().get("Etag").unwrap(), "\"abc\"");
        assert_eq!(e.ttl(), 60);
        assert_eq!(e.cached_at(), 42);
        assert_eq!(e.size(), 5);
    }

    #[test]
    fn test_default_ttl_applied_only_to_zero() {
        assert_eq!(entry(0).with_default_ttl(86400).ttl(), 86400);
        assert_eq!(entry(600).with_default_ttl(86400).ttl(), 600);
    }

    #[test]
    fn test_refreshed_keeps_content() {
        let original = entry(600);
        let refreshed = original.refreshed(1_800_000_000);

        assert_eq!(refreshed.cached_at(), 1_800_000_000);
        assert_eq!(refreshed.content(), original.content());
        assert_eq!(refreshed.ttl(), original.ttl());
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2023-01-01
        assert!(current_timestamp() > 1_672_531_200);
    }
}
