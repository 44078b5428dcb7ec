//! Statistics Module
//!
//! The `Collector` trait is handed to the stores and the proxy at construction
//! so every component reports into the same sink without global state.
//! `Stats` is the bundled implementation backing the admin `/stats` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// == Labels ==
/// Which cache store produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Memcached,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Memcached => "memcached",
        }
    }
}

/// Result of a single store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Expired,
    Success,
    Error,
}

/// How the proxy answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache without contacting the origin
    Hit,
    /// Fetched from the origin
    Miss,
    /// Origin confirmed the cached copy, served from the cache
    Revalidated,
    /// Revalidation returned a full response from the origin
    Refreshed,
    /// The request failed before a response was produced
    Error,
}

// == Collector ==
/// Sink for cache and proxy events. All methods default to no-ops.
pub trait Collector: Send + Sync {
    fn lookup(&self, _store: StoreKind, _outcome: Outcome, _elapsed: Duration) {}

    fn store(&self, _store: StoreKind, _outcome: Outcome, _elapsed: Duration) {}

    fn purge(&self, _store: StoreKind, _outcome: Outcome, _elapsed: Duration) {}

    fn eviction(&self, _store: StoreKind, _entries: usize, _bytes: usize) {}

    fn request(&self, _host: &str, _status: u16, _cache: CacheStatus, _elapsed: Duration) {}

    fn validation(&self, _host: &str, _outcome: Outcome) {}

    fn store_dropped(&self, _key: &str) {}
}

/// Collector that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollector;

impl Collector for NoopCollector {}

// == Stats ==
/// Atomic counters fed by the `Collector` callbacks.
#[derive(Debug, Default)]
pub struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    lookup_errors: AtomicU64,
    stores: AtomicU64,
    store_errors: AtomicU64,
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
    purges: AtomicU64,
    purge_misses: AtomicU64,
    requests: AtomicU64,
    request_errors: AtomicU64,
    validations: AtomicU64,
    validation_errors: AtomicU64,
    dropped_stores: AtomicU64,
}

/// Point-in-time copy of `Stats`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub lookup_errors: u64,
    pub stores: u64,
    pub store_errors: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
    pub purges: u64,
    pub purge_misses: u64,
    pub requests: u64,
    pub request_errors: u64,
    pub validations: u64,
    pub validation_errors: u64,
    pub dropped_stores: u64,
    pub hit_rate: f64,
}

impl Stats {
    // == Constructor ==
    /// Creates a new Stats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Snapshot ==
    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let expired = self.expired.load(Ordering::Relaxed);

        StatsSnapshot {
            hits,
            misses,
            expired,
            lookup_errors: self.lookup_errors.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
            purge_misses: self.purge_misses.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            dropped_stores: self.dropped_stores.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses + expired),
        }
    }
}

/// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl Collector for Stats {
    fn lookup(&self, _store: StoreKind, outcome: Outcome, _elapsed: Duration) {
        let counter = match outcome {
            Outcome::Hit | Outcome::Success => &self.hits,
            Outcome::Miss => &self.misses,
            Outcome::Expired => &self.expired,
            Outcome::Error => &self.lookup_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn store(&self, _store: StoreKind, outcome: Outcome, _elapsed: Duration) {
        match outcome {
            Outcome::Error => self.store_errors.fetch_add(1, Ordering::Relaxed),
            _ => self.stores.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn purge(&self, _store: StoreKind, outcome: Outcome, _elapsed: Duration) {
        match outcome {
            Outcome::Miss => self.purge_misses.fetch_add(1, Ordering::Relaxed),
            _ => self.purges.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn eviction(&self, _store: StoreKind, entries: usize, bytes: usize) {
        self.evictions.fetch_add(entries as u64, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn request(&self, _host: &str, status: u16, _cache: CacheStatus, _elapsed: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status >= 500 {
            self.request_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn validation(&self, _host: &str, outcome: Outcome) {
        match outcome {
            Outcome::Error => self.validation_errors.fetch_add(1, Ordering::Relaxed),
            _ => self.validations.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn store_dropped(&self, _key: &str) {
        self.dropped_stores.fetch_add(1, Ordering::Relaxed);
    }
}
