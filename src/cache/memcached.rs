//! Memcached Store Module
//!
//! Remote cache store. Entries are serialized into a single blob and
//! memcached enforces the TTL, so there is no local size accounting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{options, CacheStore, ContentEntry, ContentTypeFilter, MemcachedClient, DEFAULT_TTL};
use crate::error::{CacheError, Result};
use crate::stats::{Collector, Outcome, StoreKind};

// == Defaults ==
/// Endpoint used when no `endpoints` option is given
pub const DEFAULT_ENDPOINTS: &str = "127.0.0.1:11211";

/// Per-command timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

// == Stored Item ==
/// Blob layout written to memcached.
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    #[serde(with = "base64_body")]
    content: Vec<u8>,
    headers: HashMap<String, String>,
    content_type: String,
    cached_at: i64,
    ttl: u64,
}

impl StoredItem {
    fn encode(entry: &ContentEntry) -> Result<Vec<u8>> {
        let item = StoredItem {
            content: entry.content().to_vec(),
            headers: entry.headers().clone(),
            content_type: entry.content_type().to_string(),
            cached_at: entry.cached_at(),
            ttl: entry.ttl(),
        };
        serde_json::to_vec(&item)
            .map_err(|e| CacheError::BackendUnavailable(format!("error encoding item: {}", e)))
    }

    fn decode(blob: &[u8]) -> Result<ContentEntry> {
        let item: StoredItem =
            serde_json::from_slice(blob).map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(ContentEntry::new(
            item.content,
            item.content_type,
            item.headers,
            item.ttl,
            item.cached_at,
        ))
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// == Memcached Store ==
/// Cache store backed by one or more memcached servers.
pub struct MemcachedStore {
    client: MemcachedClient,
    filter: ContentTypeFilter,
    default_ttl: u64,
    collector: Arc<dyn Collector>,
}

impl MemcachedStore {
    // == Constructor ==
    pub fn new(
        client: MemcachedClient,
        filter: ContentTypeFilter,
        default_ttl: u64,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            client,
            filter,
            default_ttl,
            collector,
        }
    }

    /// Creates a store from the `endpoints`, `patterns`, `ttl` and
    /// `timeout_ms` options.
    pub fn from_options(
        opts: &HashMap<String, String>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let endpoints = opts
            .get("endpoints")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ENDPOINTS);
        let timeout = Duration::from_millis(options::parse(opts, "timeout_ms", DEFAULT_TIMEOUT_MS)?);

        Ok(Self::new(
            MemcachedClient::new(endpoints, timeout)?,
            ContentTypeFilter::new(opts.get("patterns").map(String::as_str))?,
            options::parse_ttl(opts, DEFAULT_TTL)?,
            collector,
        ))
    }

    pub fn client(&self) -> &MemcachedClient {
        &self.client
    }
}

#[async_trait]
impl CacheStore for MemcachedStore {
    fn is_cachable(&self, content_type: &str) -> bool {
        self.filter.matches(content_type)
    }

    async fn lookup(&self, key: &str) -> Result<Option<ContentEntry>> {
        let start = Instant::now();

        let blob = match self.client.get(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("cache miss for {}", key);
                self.collector
                    .lookup(StoreKind::Memcached, Outcome::Miss, start.elapsed());
                return Ok(None);
            }
            Err(e) => {
                debug!("error during the lookup of {}: {}", key, e);
                self.collector
                    .lookup(StoreKind::Memcached, Outcome::Error, start.elapsed());
                return Err(e);
            }
        };

        match StoredItem::decode(&blob) {
            Ok(entry) => {
                self.collector
                    .lookup(StoreKind::Memcached, Outcome::Hit, start.elapsed());
                Ok(Some(entry))
            }
            Err(e) => {
                debug!("error decoding item for {}: {}", key, e);
                self.collector
                    .lookup(StoreKind::Memcached, Outcome::Error, start.elapsed());
                Err(e)
            }
        }
    }

    async fn store(&self, key: &str, entry: ContentEntry) -> Result<()> {
        let start = Instant::now();
        let entry = entry.with_default_ttl(self.default_ttl);

        let result = match StoredItem::encode(&entry) {
            Ok(blob) => self.client.set(key, &blob, entry.ttl()).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(e) => {
                debug!("error storing item {}: {}", key, e);
                Outcome::Error
            }
        };
        self.collector
            .store(StoreKind::Memcached, outcome, start.elapsed());
        result
    }

    async fn purge(&self, key: &str) -> Result<()> {
        let start = Instant::now();

        match self.client.delete(key).await {
            Ok(true) => {
                self.collector
                    .purge(StoreKind::Memcached, Outcome::Success, start.elapsed());
                Ok(())
            }
            // Purging an absent key is not an error for a shared remote cache.
            Ok(false) => {
                self.collector
                    .purge(StoreKind::Memcached, Outcome::Miss, start.elapsed());
                Ok(())
            }
            Err(e) => {
                self.collector
                    .purge(StoreKind::Memcached, Outcome::Error, start.elapsed());
                Err(e)
            }
        }
    }
}
