//! Cache Module
//!
//! The `CacheStore` contract and its two implementations: a byte-budgeted
//! in-memory store and a memcached-backed remote store.

mod entry;
mod memcached;
mod memory;
mod options;
mod protocol;


use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::stats::Collector;

// Re-export public types
pub use entry::{current_timestamp, ContentEntry};
pub use memcached::MemcachedStore;
pub use memory::{MemoryOptions, MemoryStore};
pub use protocol::MemcachedClient;

// == Public Constants ==
/// TTL in seconds applied to entries stored with a TTL of 0
pub const DEFAULT_TTL: u64 = 86400;

/// Largest TTL in seconds any store honours (about 68 years)
pub const MAX_TTL: u64 = i32::MAX as u64;

/// Content types cached when no `patterns` option is configured
pub const DEFAULT_CONTENT_TYPE_PATTERN: &str =
    "^(image|audio|video)/.+$|^.+/javascript.*$|^text/css$";

// == Cache Store ==
/// Capability set shared by every cache backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns true if responses with this content type may be cached.
    fn is_cachable(&self, content_type: &str) -> bool;

    /// Looks up `key`.
    ///
    /// `Ok(None)` is a plain miss. A present but expired entry is removed and
    /// reported as `CacheError::Expired`.
    async fn lookup(&self, key: &str) -> Result<Option<ContentEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry.
    async fn store(&self, key: &str, entry: ContentEntry) -> Result<()>;

    /// Removes `key` from the cache.
    async fn purge(&self, key: &str) -> Result<()>;
}

// == Content Type Filter ==
/// Matches response content types against the configured allow-pattern.
#[derive(Debug, Clone)]
pub struct ContentTypeFilter {
    regex: Regex,
}

impl ContentTypeFilter {
    /// Compiles `patterns`, or the default pattern when `patterns` is empty.
    pub fn new(patterns: Option<&str>) -> Result<Self> {
        let source = match patterns {
            Some(p) if !p.is_empty() => format!("({})", p),
            _ => DEFAULT_CONTENT_TYPE_PATTERN.to_string(),
        };

        let regex = Regex::new(&source).map_err(|e| CacheError::InvalidOption {
            name: "patterns".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { regex })
    }

    pub fn matches(&self, content_type: &str) -> bool {
        self.regex.is_match(content_type)
    }
}

impl Default for ContentTypeFilter {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_CONTENT_TYPE_PATTERN).expect("default pattern is valid"),
        }
    }
}

// == Cache Backend ==
/// The store selected by configuration.
///
/// The memory variant is kept concrete so the expiry sweeper can reach it.
#[derive(Clone)]
pub enum CacheBackend {
    Memory(Arc<MemoryStore>),
    Memcached(Arc<MemcachedStore>),
}

impl CacheBackend {
    /// Builds the store named by `config.kind`.
    pub fn from_config(config: &CacheConfig, collector: Arc<dyn Collector>) -> Result<Self> {
        match config.kind.as_str() {
            "memory" => Ok(CacheBackend::Memory(Arc::new(MemoryStore::from_options(
                &config.options,
                collector,
            )?))),
            "memcached" => Ok(CacheBackend::Memcached(Arc::new(
                MemcachedStore::from_options(&config.options, collector)?,
            ))),
            other => Err(CacheError::InvalidCacheType(other.to_string())),
        }
    }

    /// Returns the backend as a trait object for the proxy and admin API.
    pub fn store(&self) -> Arc<dyn CacheStore> {
        match self {
            CacheBackend::Memory(store) => store.clone(),
            CacheBackend::Memcached(store) => store.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheBackend::Memory(_) => "memory",
            CacheBackend::Memcached(_) => "memcached",
        }
    }
}
