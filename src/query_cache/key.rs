//! Query cache keys: normalized query text plus search parameters, hashed with BLAKE3.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Parameters forwarded to the search provider; part of the cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of results
    pub limit: usize,
    /// Minimum relevance for a result to be returned
    pub threshold: Option<f32>,
    /// Restrict the search to these collections (empty = all)
    pub collections: Vec<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            collections: Vec::new(),
        }
    }
}

/// Stable identity of a (query, params) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey([u8; 32]);

impl QueryKey {
    /// Compute the key for a query and its parameters
    ///
    /// Key = hash("query" || len || normalized query || limit || threshold || collections)
    ///
    /// Queries that differ only in Unicode composition, case, or whitespace share a key,
    /// as do parameter sets that differ only in collection order.
    pub fn new(query: &str, params: &SearchParams) -> Self {
        let normalized = normalize_query(query);
        let mut hasher = Hasher::new();

        hasher.update(b"query");
        hasher.update(&(normalized.len() as u64).to_be_bytes());
        hasher.update(normalized.as_bytes());

        hasher.update(&(params.limit as u64).to_be_bytes());
        match params.threshold {
            Some(threshold) => {
                hasher.update(&[1]);
                hasher.update(&threshold.to_bits().to_be_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }

        let mut collections: Vec<&str> = params.collections.iter().map(|c| c.as_str()).collect();
        collections.sort_unstable();
        collections.dedup();
        hasher.update(&(collections.len() as u64).to_be_bytes());
        for collection in collections {
            hasher.update(&(collection.len() as u64).to_be_bytes());
            hasher.update(collection.as_bytes());
        }

        QueryKey(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// NFC-normalize, lowercase, and collapse runs of whitespace
pub fn normalize_query(query: &str) -> String {
    let composed: String = query.nfc().collect();
    composed
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
