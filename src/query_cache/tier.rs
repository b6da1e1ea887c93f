//! Cache entries and the slow (larger, optionally persistent) tier.

use super::key::QueryKey;
use crate::clock::Timestamp;
use crate::error::StorageError;
use crate::types::ContextItem;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One cached search result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: QueryKey,
    /// Ranked results
    pub items: Vec<ContextItem>,
    pub inserted_at: Timestamp,
    pub last_used_at: Timestamp,
    pub use_count: u64,
    /// Best relevance among `items`
    pub score: Option<f32>,
    pub(crate) inserted_seq: u64,
    pub(crate) last_used_seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(key: QueryKey, items: Vec<ContextItem>, now: Timestamp, seq: u64) -> Self {
        let score = items
            .iter()
            .filter_map(|item| item.relevance())
            .max_by(|a, b| a.total_cmp(b));
        Self {
            key,
            items,
            inserted_at: now,
            last_used_at: now,
            use_count: 0,
            score,
            inserted_seq: seq,
            last_used_seq: seq,
        }
    }

    pub(crate) fn touch(&mut self, now: Timestamp, seq: u64) {
        self.last_used_at = now;
        self.last_used_seq = seq;
        self.use_count += 1;
    }

    pub fn rank_score(&self) -> f32 {
        self.score.unwrap_or(0.0)
    }
}

/// Backing store behind the bounded fast tier.
///
/// Storage failures never fail a cache read: callers treat them as a miss.
pub trait SlowTier: Send + Sync {
    fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>, StorageError>;

    fn put(&self, entry: &CacheEntry) -> Result<(), StorageError>;

    fn remove(&self, key: &QueryKey) -> Result<(), StorageError>;

    fn len(&self) -> Result<usize, StorageError>;
}

/// Unbounded in-process slow tier
#[derive(Default)]
pub struct MemorySlowTier {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
}

impl MemorySlowTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlowTier for MemorySlowTier {
    fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.entries.write().insert(entry.key, entry.clone());
        Ok(())
    }

    fn remove(&self, key: &QueryKey) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.read().len())
    }
}

/// Sled-backed slow tier; entries survive restarts
pub struct SledSlowTier {
    tree: sled::Tree,
}

impl SledSlowTier {
    const TREE_NAME: &'static str = "query_cache";

    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(&db)
    }

    pub fn with_db(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }
}

impl SlowTier for SledSlowTier {
    fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>, StorageError> {
        match self.tree.get(key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let value = bincode::serialize(entry)?;
        self.tree.insert(entry.key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &QueryKey) -> Result<(), StorageError> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.tree.len())
    }
}
