//! In-Memory Store Module
//!
//! Byte-budgeted cache with lazy TTL expiry and hit-driven eviction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{options, CacheStore, ContentEntry, ContentTypeFilter, DEFAULT_TTL, MAX_TTL};
use crate::error::{CacheError, Result};
use crate::stats::{Collector, Outcome, StoreKind};

// == Defaults ==
/// Memory budget used when no `memory_limit` option is given (1 GiB)
pub const DEFAULT_MEMORY_LIMIT: usize = 1024 * 1024 * 1024;

/// Delete arbitrary entries when the hit heuristic cannot free enough space
pub const DEFAULT_FORCE_PURGE: bool = true;

/// Seconds between expiry sweeps
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 60;

/// Eviction starts by removing entries below this share of total hits...
const EVICTION_START_PERCENT: u64 = 10;

/// ...and raises the bar one point at a time up to this share.
const EVICTION_MAX_PERCENT: u64 = 50;

// == Store Record ==
#[derive(Debug)]
struct StoreRecord {
    entry: ContentEntry,
    size: usize,
    expires_at: Instant,
    hits: AtomicU64,
}

impl StoreRecord {
    fn new(entry: ContentEntry, now: Instant) -> Self {
        let size = entry.size();
        let expires_at = now + Duration::from_secs(entry.ttl().min(MAX_TTL));
        Self {
            entry,
            size,
            expires_at,
            hits: AtomicU64::new(0),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

// == Store State ==
/// Map plus the running byte total. `current_size` always equals the sum of
/// `size` over `records`.
#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, StoreRecord>,
    current_size: usize,
}

impl StoreState {
    fn remove(&mut self, key: &str) -> Option<StoreRecord> {
        let record = self.records.remove(key)?;
        self.current_size -= record.size;
        Some(record)
    }

    /// Drops `key` if it is expired at `now`. A live record is counted as a
    /// hit and returned instead.
    fn take_expired(&mut self, key: &str, now: Instant) -> Option<ContentEntry> {
        match self.records.get(key) {
            Some(record) if !record.is_expired(now) => {
                record.hits.fetch_add(1, Ordering::Relaxed);
                Some(record.entry.clone())
            }
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: String, record: StoreRecord) {
        self.current_size += record.size;
        if let Some(old) = self.records.insert(key, record) {
            self.current_size -= old.size;
        }
    }
}

// == Memory Store Options ==
/// Tunables for `MemoryStore`.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Maximum total body bytes held
    pub memory_limit: usize,
    /// TTL in seconds substituted for entries stored with TTL 0
    pub default_ttl: u64,
    /// Content types eligible for caching
    pub filter: ContentTypeFilter,
    /// Evict arbitrary entries when the hit heuristic falls short
    pub force_purge: bool,
    /// Seconds between expiry sweeps, 0 disables the sweeper
    pub cleanup_interval: u64,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            default_ttl: DEFAULT_TTL,
            filter: ContentTypeFilter::default(),
            force_purge: DEFAULT_FORCE_PURGE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl MemoryOptions {
    /// Parses the `memory_limit`, `ttl`, `patterns`, `force_purge` and
    /// `cleanup_interval` options.
    pub fn from_options(opts: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            memory_limit: options::parse(opts, "memory_limit", DEFAULT_MEMORY_LIMIT)?,
            default_ttl: options::parse_ttl(opts, DEFAULT_TTL)?,
            filter: ContentTypeFilter::new(opts.get("patterns").map(String::as_str))?,
            force_purge: options::parse_bool(opts, "force_purge", DEFAULT_FORCE_PURGE)?,
            cleanup_interval: options::parse(opts, "cleanup_interval", DEFAULT_CLEANUP_INTERVAL)?,
        })
    }
}

// == Memory Store ==
/// In-process cache bounded by total body size.
///
/// One `RwLock` guards the whole map. Lookups take the read lock and bump
/// the atomic hit counters; stores, purges and eviction take the write lock,
/// so eviction always sees a consistent hit distribution.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    total_hits: AtomicU64,
    options: MemoryOptions,
    collector: Arc<dyn Collector>,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new(options: MemoryOptions, collector: Arc<dyn Collector>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            total_hits: AtomicU64::new(0),
            options,
            collector,
        }
    }

    /// Creates a store from the raw configuration options.
    pub fn from_options(
        opts: &HashMap<String, String>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        Ok(Self::new(MemoryOptions::from_options(opts)?, collector))
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    /// Sum of the body sizes of all live records.
    pub async fn current_size(&self) -> usize {
        self.state.read().await.current_size
    }

    /// Number of records, including expired ones not yet collected.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Recomputes the byte total from the records themselves.
    #[cfg(test)]
    pub(crate) async fn recount_size(&self) -> usize {
        self.state.read().await.records.values().map(|r| r.size).sum()
    }

    /// Hits served since the store was created.
    pub fn total_hits(&self) -> u64 {
        self.total_hits.load(Ordering::Relaxed)
    }

    // == Cleanup Expired ==
    /// Removes all expired records, returning how many were removed.
    pub async fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    // == Free Memory ==
    /// Evicts records until at least `needed` bytes are released, never
    /// touching `protect` (the key being written).
    ///
    /// Candidates are expired records and records whose hit count is below
    /// `threshold%` of all hits, with the threshold climbing from 10 to 50.
    /// With force purge enabled, arbitrary records make up any shortfall.
    /// Every marked record is deleted even if the target is missed.
    ///
    /// Returns the number of bytes freed.
    fn free_memory(&self, state: &mut StoreState, protect: &str, needed: usize) -> usize {
        debug!("freeing up {} bytes of memory", needed);
        let now = Instant::now();
        let total_hits = self.total_hits();
        let mut marked: HashSet<String> = HashSet::new();
        let mut freed = 0;

        'thresholds: for threshold in EVICTION_START_PERCENT..=EVICTION_MAX_PERCENT {
            let min_hits = threshold * total_hits / 100;

            for (key, record) in &state.records {
                if key == protect || marked.contains(key) {
                    continue;
                }
                if record.is_expired(now) || record.hits() < min_hits {
                    marked.insert(key.clone());
                    freed += record.size;
                    if freed >= needed {
                        break 'thresholds;
                    }
                }
            }
        }

        if freed < needed && self.options.force_purge {
            for (key, record) in &state.records {
                if key == protect || marked.contains(key) {
                    continue;
                }
                marked.insert(key.clone());
                freed += record.size;
                if freed >= needed {
                    break;
                }
            }
        }

        for key in &marked {
            debug!("purging {}", key);
            state.remove(key);
        }
        self.collector.eviction(StoreKind::Memory, marked.len(), freed);

        freed
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn is_cachable(&self, content_type: &str) -> bool {
        self.options.filter.matches(content_type)
    }

    async fn lookup(&self, key: &str) -> Result<Option<ContentEntry>> {
        let start = Instant::now();

        {
            let state = self.state.read().await;
            match state.records.get(key) {
                None => {
                    debug!("item {} not found", key);
                    self.collector
                        .lookup(StoreKind::Memory, Outcome::Miss, start.elapsed());
                    return Ok(None);
                }
                Some(record) if !record.is_expired(Instant::now()) => {
                    record.hits.fetch_add(1, Ordering::Relaxed);
                    self.total_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("successfully looked up {}", key);
                    self.collector
                        .lookup(StoreKind::Memory, Outcome::Hit, start.elapsed());
                    return Ok(Some(record.entry.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: upgrade to the write lock and re-check, a concurrent store
        // may have replaced the record in between.
        let fresh = self.state.write().await.take_expired(key, Instant::now());
        if let Some(entry) = fresh {
            self.total_hits.fetch_add(1, Ordering::Relaxed);
            debug!("successfully looked up {}", key);
            self.collector
                .lookup(StoreKind::Memory, Outcome::Hit, start.elapsed());
            return Ok(Some(entry));
        }

        debug!("item {} is expired", key);
        self.collector
            .lookup(StoreKind::Memory, Outcome::Expired, start.elapsed());
        Err(CacheError::Expired(key.to_string()))
    }

    async fn store(&self, key: &str, entry: ContentEntry) -> Result<()> {
        let start = Instant::now();
        let size = entry.size();
        let limit = self.options.memory_limit;

        if size > limit {
            self.collector
                .store(StoreKind::Memory, Outcome::Error, start.elapsed());
            return Err(CacheError::TooLarge { size, limit });
        }

        let entry = entry.with_default_ttl(self.options.default_ttl);
        let mut state = self.state.write().await;

        let replaced = state.records.get(key).map_or(0, |record| record.size);
        let projected = state.current_size - replaced + size;
        if projected > limit {
            let needed = projected - limit;
            debug!("memory: {}/{}", projected, limit);

            let freed = self.free_memory(&mut state, key, needed);
            if freed < needed {
                debug!("unable to free enough memory for {} ({}/{})", key, freed, needed);
                self.collector
                    .store(StoreKind::Memory, Outcome::Error, start.elapsed());
                return Err(CacheError::InsufficientMemory { freed, needed });
            }
        }

        state.insert(key.to_string(), StoreRecord::new(entry, Instant::now()));
        drop(state);

        debug!("successfully stored item for {}", key);
        self.collector
            .store(StoreKind::Memory, Outcome::Success, start.elapsed());
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let removed = self.state.write().await.remove(key);

        match removed {
            Some(_) => {
                debug!("successfully purged item {}", key);
                self.collector
                    .purge(StoreKind::Memory, Outcome::Success, start.elapsed());
                Ok(())
            }
            None => {
                self.collector
                    .purge(StoreKind::Memory, Outcome::Miss, start.elapsed());
                Err(CacheError::NotFound(key.to_string()))
            }
        }
    }
}
