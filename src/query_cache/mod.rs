//! Query Cache
//!
//! Retrieval results keyed by normalized query. A small fast tier is held entirely in
//! process in front of a larger slow tier. Slow-tier hits are promoted into the fast tier;
//! entries evicted from the fast tier are written back to the slow tier. Entries older
//! than the cache TTL are never returned, whichever tier holds them.

pub mod key;
pub mod policy;
pub mod search;
pub mod tier;

pub use key::{normalize_query, QueryKey, SearchParams};
pub use policy::EvictionPolicy;
pub use search::{QuerySource, RetrievalProvider, SearchHit, SearchProvider, TopicBoard};
pub use tier::{CacheEntry, MemorySlowTier, SledSlowTier, SlowTier};

use crate::clock::{Clock, Timestamp};
use crate::error::ProviderError;
use crate::refresh::Singleflight;
use crate::types::ContextItem;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query cache configuration
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Maximum fast-tier entries
    pub capacity: usize,
    /// Maximum entry age
    pub ttl: Duration,
    pub policy: EvictionPolicy,
    /// Per-call timeout for the search provider
    pub search_timeout: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            ttl: Duration::from_secs(30),
            policy: EvictionPolicy::Lru,
            search_timeout: Duration::from_secs(4),
        }
    }
}

/// Observability snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses); 0 before the first lookup
    pub hit_rate: f64,
    /// Fast-tier entry count
    pub size: usize,
    pub slow_size: usize,
    pub evictions: u64,
}

type SearchOutcome = Result<Arc<[ContextItem]>, ProviderError>;

struct CacheInner {
    config: QueryCacheConfig,
    capacity: AtomicUsize,
    fast: Mutex<HashMap<QueryKey, CacheEntry>>,
    slow: Arc<dyn SlowTier>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flights: Singleflight<QueryKey, SearchOutcome>,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig, slow: Arc<dyn SlowTier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                capacity: AtomicUsize::new(config.capacity.max(1)),
                config,
                fast: Mutex::new(HashMap::new()),
                slow,
                clock,
                seq: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                flights: Singleflight::new(),
            }),
        }
    }

    pub fn in_memory(config: QueryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config, Arc::new(MemorySlowTier::new()), clock)
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.inner.config
    }

    /// Current fast-tier capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Change the fast-tier capacity (minimum 1) and evict down to it.
    ///
    /// Returns how many entries were demoted to the slow tier.
    pub fn set_capacity(&self, capacity: usize) -> usize {
        self.inner.capacity.store(capacity.max(1), Ordering::Relaxed);
        self.evict_if_needed()
    }

    /// Look up an entry, promoting slow-tier hits. Counts as a use of the entry.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        let inner = &self.inner;
        let now = inner.clock.now();

        {
            let mut fast = inner.fast.lock();
            if let Some(entry) = fast.get_mut(key) {
                if self.is_fresh(entry, now) {
                    entry.touch(now, self.next_seq());
                    inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, tier = "fast", "Query cache hit");
                    return Some(entry.clone());
                }
                fast.remove(key);
            }
        }

        let stored = match inner.slow.get(key) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Slow tier read failed, treating as miss");
                None
            }
        };

        match stored {
            Some(mut entry) if self.is_fresh(&entry, now) => {
                entry.touch(now, self.next_seq());
                let evicted = {
                    let mut fast = inner.fast.lock();
                    fast.insert(*key, entry.clone());
                    self.evict_over_capacity(&mut fast, Some(key))
                };
                self.write_back(evicted);
                inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, tier = "slow", "Query cache hit, promoted to fast tier");
                Some(entry)
            }
            Some(_) => {
                if let Err(e) = inner.slow.remove(key) {
                    warn!(key = %key, error = %e, "Failed to drop expired slow tier entry");
                }
                inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a result set into both tiers, then enforce fast-tier capacity.
    ///
    /// The entry just written is never chosen as its own eviction victim.
    pub fn put(&self, key: QueryKey, items: Vec<ContextItem>) -> CacheEntry {
        let now = self.inner.clock.now();
        let entry = CacheEntry::new(key, items, now, self.next_seq());

        if let Err(e) = self.inner.slow.put(&entry) {
            warn!(key = %key, error = %e, "Slow tier write failed");
        }
        let evicted = {
            let mut fast = self.inner.fast.lock();
            fast.insert(key, entry.clone());
            self.evict_over_capacity(&mut fast, Some(&key))
        };
        self.write_back(evicted);
        entry
    }

    /// Evict fast-tier entries until within capacity. Returns how many were evicted.
    pub fn evict_if_needed(&self) -> usize {
        let evicted = {
            let mut fast = self.inner.fast.lock();
            self.evict_over_capacity(&mut fast, None)
        };
        let count = evicted.len();
        self.write_back(evicted);
        count
    }

    /// Cached results for `query`, or one shared search call on a miss.
    ///
    /// Concurrent misses for the same key wait on a single provider call.
    pub async fn get_or_search(
        &self,
        query: &str,
        params: &SearchParams,
        search: Arc<dyn SearchProvider>,
    ) -> Result<Arc<[ContextItem]>, ProviderError> {
        let key = QueryKey::new(query, params);
        if let Some(entry) = self.get(&key) {
            return Ok(entry.items.into());
        }

        let cache = self.clone();
        let query = query.to_string();
        let params = params.clone();
        self.inner
            .flights
            .run(key, move || async move {
                let timeout = cache.inner.config.search_timeout;
                let hits = match tokio::time::timeout(timeout, search.search(&query, &params)).await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(ProviderError::Timeout(timeout)),
                };
                let items: Vec<ContextItem> = hits
                    .into_iter()
                    .enumerate()
                    .map(|(rank, hit)| hit.into_item(rank))
                    .collect();
                debug!(key = %key, results = items.len(), "Search completed, caching results");
                let entry = cache.put(key, items);
                Ok::<Arc<[ContextItem]>, ProviderError>(entry.items.into())
            })
            .await?
    }

    pub fn in_fast_tier(&self, key: &QueryKey) -> bool {
        self.inner.fast.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.fast.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueryCacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        QueryCacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size: self.len(),
            slow_size: self.inner.slow.len().unwrap_or(0),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Timestamp) -> bool {
        now.since(entry.inserted_at) < self.inner.config.ttl
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_over_capacity(
        &self,
        fast: &mut HashMap<QueryKey, CacheEntry>,
        protect: Option<&QueryKey>,
    ) -> Vec<CacheEntry> {
        let policy = self.inner.config.policy;
        let mut evicted = Vec::new();
        let capacity = self.capacity();
        while fast.len() > capacity {
            let Some(victim) = policy.select_victim(fast, protect) else {
                break;
            };
            if let Some(entry) = fast.remove(&victim) {
                debug!(key = %victim, policy = ?policy, "Evicted from fast tier");
                evicted.push(entry);
            }
        }
        self.inner
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// Demote evicted entries, keeping their usage counters
    fn write_back(&self, evicted: Vec<CacheEntry>) {
        for entry in evicted {
            if let Err(e) = self.inner.slow.put(&entry) {
                warn!(key = %entry.key, error = %e, "Failed to demote entry to slow tier");
            }
        }
    }
}
