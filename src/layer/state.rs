//! Per-(scope, layer) cached state and its validity model.

use crate::clock::Timestamp;
use crate::error::ProviderError;
use crate::types::{ContextItem, Layer, Ttl};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cached item set of one layer for one scope.
///
/// `items` is only ever non-empty after at least one successful refresh. Readers take
/// [`LayerState::snapshot`], which is an immutable view that a later refresh replaces
/// wholesale.
#[derive(Debug, Clone)]
pub struct LayerState {
    items: Arc<[ContextItem]>,
    created_at: Option<Timestamp>,
    last_accessed_at: Option<Timestamp>,
    access_count: u64,
    cached_token_count: usize,
    ttl: Ttl,
    last_error: Option<ProviderError>,
    /// Invalidation generation this state was refreshed against
    generation: u64,
}

impl LayerState {
    pub fn new(ttl: Ttl) -> Self {
        Self {
            items: Arc::from(Vec::new()),
            created_at: None,
            last_accessed_at: None,
            access_count: 0,
            cached_token_count: 0,
            ttl,
            last_error: None,
            generation: 0,
        }
    }

    /// Non-empty and within TTL. Does not account for explicit invalidation.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        if self.items.is_empty() {
            return false;
        }
        match self.created_at {
            Some(created_at) => self.ttl.admits(now.since(created_at)),
            None => false,
        }
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn snapshot(&self) -> Arc<[ContextItem]> {
        Arc::clone(&self.items)
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> Option<Timestamp> {
        self.last_accessed_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn cached_token_count(&self) -> usize {
        self.cached_token_count
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    pub(crate) fn commit(
        &mut self,
        items: Arc<[ContextItem]>,
        token_count: usize,
        now: Timestamp,
        generation: u64,
    ) {
        self.items = items;
        self.cached_token_count = token_count;
        self.created_at = Some(now);
        self.last_error = None;
        self.generation = generation;
    }

    pub(crate) fn record_failure(&mut self, error: ProviderError) {
        self.last_error = Some(error);
    }

    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.last_accessed_at = Some(now);
        self.access_count += 1;
    }
}

/// Introspection record for one layer of one scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDescription {
    pub layer: Layer,
    pub item_count: usize,
    pub token_count: usize,
    /// Time since the last successful refresh
    pub age: Option<Duration>,
    pub ttl: Ttl,
    pub stale: bool,
    pub access_count: u64,
    pub last_error: Option<String>,
}

/// State cell plus the lock-free invalidation counter.
///
/// Invalidation bumps `invalidations` without touching the state lock. State is stale
/// whenever it was refreshed against an older generation, so any number of signals
/// before the next read collapse into one refresh, and a signal arriving during an
/// in-flight refresh still marks the result stale.
pub(crate) struct LayerSlot {
    pub(crate) state: RwLock<LayerState>,
    invalidations: AtomicU64,
}

impl LayerSlot {
    pub(crate) fn new(ttl: Ttl) -> Self {
        Self {
            state: RwLock::new(LayerState::new(ttl)),
            invalidations: AtomicU64::new(0),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.invalidations.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn is_invalidated(&self, state: &LayerState) -> bool {
        state.generation < self.generation()
    }

    pub(crate) fn is_valid(&self, state: &LayerState, now: Timestamp) -> bool {
        state.is_fresh(now) && !self.is_invalidated(state)
    }

    pub(crate) fn describe(&self, layer: Layer, now: Timestamp) -> LayerDescription {
        let state = self.state.read();
        LayerDescription {
            layer,
            item_count: state.items.len(),
            token_count: state.cached_token_count,
            age: state.created_at.map(|created_at| now.since(created_at)),
            ttl: state.ttl,
            stale: !self.is_valid(&state, now),
            access_count: state.access_count,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}
