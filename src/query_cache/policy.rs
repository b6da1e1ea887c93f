//! Fast-tier eviction policies.

use super::key::QueryKey;
use super::tier::CacheEntry;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Which fast-tier entry to give up when over capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used; ties go to the oldest insertion
    Lfu,
    /// Lowest best-relevance score; ties go to least recently used
    Relevance,
}

impl EvictionPolicy {
    /// Order entries so that the first to evict compares `Less`
    pub fn compare(self, a: &CacheEntry, b: &CacheEntry) -> Ordering {
        match self {
            EvictionPolicy::Lru => by_recency(a, b),
            EvictionPolicy::Lfu => a
                .use_count
                .cmp(&b.use_count)
                .then_with(|| by_insertion(a, b)),
            EvictionPolicy::Relevance => a
                .rank_score()
                .total_cmp(&b.rank_score())
                .then_with(|| by_recency(a, b)),
        }
    }

    /// Pick the entry to evict, never choosing `protect`
    pub fn select_victim(
        self,
        entries: &HashMap<QueryKey, CacheEntry>,
        protect: Option<&QueryKey>,
    ) -> Option<QueryKey> {
        entries
            .values()
            .filter(|entry| Some(&entry.key) != protect)
            .min_by(|a, b| self.compare(a, b))
            .map(|entry| entry.key)
    }
}

// Sequence numbers keep the order total when timestamps collide
fn by_recency(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    a.last_used_at
        .cmp(&b.last_used_at)
        .then(a.last_used_seq.cmp(&b.last_used_seq))
}

fn by_insertion(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    a.inserted_at
        .cmp(&b.inserted_at)
        .then(a.inserted_seq.cmp(&b.inserted_seq))
}
