//! Layer store: per-scope cached layer state with coordinated refresh.

use super::provider::{LayerProvider, ProviderRegistry};
use super::state::{LayerDescription, LayerSlot};
use crate::clock::Clock;
use crate::error::ProviderError;
use crate::refresh::Singleflight;
use crate::token::TokenCounter;
use crate::types::{ContextItem, Layer, Scope};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type SlotKey = (Scope, Layer);

/// How current a [`LayerRead`] is
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh,
    /// Refresh failed; serving the previous (stale) item set
    Degraded(ProviderError),
    /// Refresh failed with nothing to fall back on; the layer is empty
    Unavailable(ProviderError),
}

/// Snapshot of one layer's items as returned to a reader
#[derive(Debug, Clone)]
pub struct LayerRead {
    pub layer: Layer,
    pub items: Arc<[ContextItem]>,
    pub freshness: Freshness,
}

impl LayerRead {
    fn new(layer: Layer, items: Arc<[ContextItem]>, freshness: Freshness) -> Self {
        Self {
            layer,
            items,
            freshness,
        }
    }

    fn empty(layer: Layer) -> Self {
        Self::new(layer, Arc::from(Vec::new()), Freshness::Fresh)
    }
}

struct StoreInner {
    registry: Arc<ProviderRegistry>,
    slots: RwLock<HashMap<SlotKey, Arc<LayerSlot>>>,
    flights: Singleflight<SlotKey, LayerRead>,
    clock: Arc<dyn Clock>,
    counter: TokenCounter,
    provider_timeout: Duration,
}

/// Cached layer state for every scope.
///
/// Validity is re-checked on every read. There is no background sweep, so idle scopes
/// cost nothing. A stale read joins (or starts) the single in-flight refresh for its
/// `(scope, layer)` key.
#[derive(Clone)]
pub struct LayerStore {
    inner: Arc<StoreInner>,
}

impl LayerStore {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        counter: TokenCounter,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                registry,
                slots: RwLock::new(HashMap::new()),
                flights: Singleflight::new(),
                clock,
                counter,
                provider_timeout,
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// Current items of `layer` for `scope`, refreshing first if stale.
    pub async fn get_items(&self, scope: &Scope, layer: Layer) -> LayerRead {
        let inner = &self.inner;
        let Some(provider) = inner.registry.provider(layer) else {
            return LayerRead::empty(layer);
        };
        let ttl = inner.registry.settings(layer).ttl;
        let key = (scope.clone(), layer);

        if !ttl.is_cacheable() {
            // Never cached, but concurrent callers still share one provider call
            let scope = scope.clone();
            let timeout = inner.provider_timeout;
            let outcome = inner
                .flights
                .run(key, move || async move {
                    match fetch(provider, &scope, layer, timeout).await {
                        Ok(items) => LayerRead::new(layer, items.into(), Freshness::Fresh),
                        Err(e) => {
                            warn!(scope = %scope, layer = %layer, error = %e, "Uncached layer provider failed");
                            LayerRead::new(layer, Arc::from(Vec::new()), Freshness::Unavailable(e))
                        }
                    }
                })
                .await;
            return outcome.unwrap_or_else(|e| {
                LayerRead::new(layer, Arc::from(Vec::new()), Freshness::Unavailable(e))
            });
        }

        let slot = self.slot(scope, layer);
        let now = inner.clock.now();
        {
            let mut state = slot.state.write();
            if slot.is_valid(&state, now) {
                state.touch(now);
                debug!(scope = %scope, layer = %layer, "Layer cache hit");
                return LayerRead::new(layer, state.snapshot(), Freshness::Fresh);
            }
        }

        debug!(scope = %scope, layer = %layer, "Layer stale, awaiting coordinated refresh");
        let work = RefreshWork {
            provider,
            slot: Arc::clone(&slot),
            scope: scope.clone(),
            layer,
            clock: Arc::clone(&inner.clock),
            counter: inner.counter.clone(),
            timeout: inner.provider_timeout,
        };
        let read = match inner.flights.run(key, move || work.run()).await {
            Ok(read) => read,
            Err(e) => {
                let state = slot.state.read();
                if state.has_items() {
                    LayerRead::new(layer, state.snapshot(), Freshness::Degraded(e))
                } else {
                    LayerRead::new(layer, state.snapshot(), Freshness::Unavailable(e))
                }
            }
        };

        slot.state.write().touch(inner.clock.now());
        read
    }

    /// `true` iff the layer holds items, is within TTL, and has not been invalidated.
    pub fn is_valid(&self, scope: &Scope, layer: Layer) -> bool {
        let slots = self.inner.slots.read();
        match slots.get(&(scope.clone(), layer)) {
            Some(slot) => {
                let state = slot.state.read();
                slot.is_valid(&state, self.inner.clock.now())
            }
            None => false,
        }
    }

    /// Mark a layer stale without discarding its items.
    ///
    /// Only bumps an atomic counter, so it never waits on readers or an in-flight refresh.
    /// Returns `false` if the scope holds no state for the layer yet.
    pub fn invalidate(&self, scope: &Scope, layer: Layer) -> bool {
        let slots = self.inner.slots.read();
        match slots.get(&(scope.clone(), layer)) {
            Some(slot) => {
                slot.invalidate();
                debug!(scope = %scope, layer = %layer, "Layer invalidated");
                true
            }
            None => false,
        }
    }

    pub fn describe(&self, scope: &Scope) -> Vec<LayerDescription> {
        let now = self.inner.clock.now();
        let slots = self.inner.slots.read();
        Layer::ALL
            .iter()
            .map(|&layer| match slots.get(&(scope.clone(), layer)) {
                Some(slot) => slot.describe(layer, now),
                None => LayerDescription {
                    layer,
                    item_count: 0,
                    token_count: 0,
                    age: None,
                    ttl: self.inner.registry.settings(layer).ttl,
                    stale: true,
                    access_count: 0,
                    last_error: None,
                },
            })
            .collect()
    }

    /// Release all cached state held for a scope
    pub fn drop_scope(&self, scope: &Scope) -> usize {
        let mut slots = self.inner.slots.write();
        let before = slots.len();
        slots.retain(|(slot_scope, _), _| slot_scope != scope);
        before - slots.len()
    }

    pub fn scope_count(&self) -> usize {
        let slots = self.inner.slots.read();
        let mut scopes: Vec<&Scope> = slots.keys().map(|(scope, _)| scope).collect();
        scopes.sort();
        scopes.dedup();
        scopes.len()
    }

    fn slot(&self, scope: &Scope, layer: Layer) -> Arc<LayerSlot> {
        let key = (scope.clone(), layer);
        if let Some(slot) = self.inner.slots.read().get(&key) {
            return Arc::clone(slot);
        }
        let ttl = self.inner.registry.settings(layer).ttl;
        let mut slots = self.inner.slots.write();
        Arc::clone(
            slots
                .entry(key)
                .or_insert_with(|| Arc::new(LayerSlot::new(ttl))),
        )
    }
}

/// One coordinated refresh of a cached layer. Runs detached from the requesting task.
struct RefreshWork {
    provider: Arc<dyn LayerProvider>,
    slot: Arc<LayerSlot>,
    scope: Scope,
    layer: Layer,
    clock: Arc<dyn Clock>,
    counter: TokenCounter,
    timeout: Duration,
}

impl RefreshWork {
    async fn run(self) -> LayerRead {
        let layer = self.layer;
        let generation = self.slot.generation();
        {
            // A refresh that completed just before this one was scheduled may already
            // have produced valid state
            let state = self.slot.state.read();
            if self.slot.is_valid(&state, self.clock.now()) {
                return LayerRead::new(layer, state.snapshot(), Freshness::Fresh);
            }
        }

        let started = Instant::now();
        let result = fetch(Arc::clone(&self.provider), &self.scope, layer, self.timeout).await;
        let now = self.clock.now();

        match result {
            Ok(items) => {
                let tokens = self.counter.count_items(&items);
                let items: Arc<[ContextItem]> = items.into();
                let count = items.len();
                self.slot
                    .state
                    .write()
                    .commit(Arc::clone(&items), tokens, now, generation);
                info!(
                    scope = %self.scope,
                    layer = %layer,
                    provider = self.provider.name(),
                    items = count,
                    tokens,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Layer refreshed"
                );
                LayerRead::new(layer, items, Freshness::Fresh)
            }
            Err(e) => {
                let mut state = self.slot.state.write();
                state.record_failure(e.clone());
                let fallback = state.has_items();
                warn!(
                    scope = %self.scope,
                    layer = %layer,
                    provider = self.provider.name(),
                    error = %e,
                    stale_fallback = fallback,
                    "Layer refresh failed"
                );
                if fallback {
                    LayerRead::new(layer, state.snapshot(), Freshness::Degraded(e))
                } else {
                    LayerRead::new(layer, state.snapshot(), Freshness::Unavailable(e))
                }
            }
        }
    }
}

/// Call a provider under the per-call timeout and tag results with the serving layer.
async fn fetch(
    provider: Arc<dyn LayerProvider>,
    scope: &Scope,
    layer: Layer,
    timeout: Duration,
) -> Result<Vec<ContextItem>, ProviderError> {
    let items = match tokio::time::timeout(timeout, provider.fetch(scope)).await {
        Ok(result) => result?,
        Err(_) => return Err(ProviderError::Timeout(timeout)),
    };
    Ok(items
        .into_iter()
        .map(|item| item.with_origin(layer))
        .collect())
}
