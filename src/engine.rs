//! Context engine facade: assembly, invalidation, and introspection.

use crate::budget::{self, LayerSelection, TokenBudget};
use crate::clock::{Clock, SystemClock};
use crate::config::StrataConfig;
use crate::error::ConfigError;
use crate::invalidate::Invalidator;
use crate::layer::{
    Freshness, LayerDescription, LayerProvider, LayerStore, ProviderRegistry,
    ProviderRegistryBuilder,
};
use crate::query_cache::{QueryCache, QueryCacheStats};
use crate::token::{CharHeuristicEstimator, TokenCounter, TokenEstimator};
use crate::types::{ContextItem, Layer, Scope, Ttl};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a layer's contribution is degraded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningKind {
    /// Refresh failed; stale items were served instead
    StaleFallback { error: String },
    /// Refresh failed with no previous items; the layer contributed nothing
    ProviderFailed { error: String },
    /// Ephemeral input was included in full past the available budget
    BudgetExceeded { required: usize, available: usize },
    /// Token estimator failed; a conservative estimate was used
    EstimatorFallback,
}

/// Non-fatal problem attached to an otherwise successful assembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub layer: Layer,
    #[serde(flatten)]
    pub kind: WarningKind,
}

impl Warning {
    pub fn reason(&self) -> String {
        match &self.kind {
            WarningKind::StaleFallback { error } => {
                format!("serving stale items after refresh failure: {}", error)
            }
            WarningKind::ProviderFailed { error } => {
                format!("layer empty after refresh failure: {}", error)
            }
            WarningKind::BudgetExceeded {
                required,
                available,
            } => format!(
                "budget exceeded: ephemeral input needs {} tokens, {} available",
                required, available
            ),
            WarningKind::EstimatorFallback => {
                "token estimator failed, used conservative estimate".to_string()
            }
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self.kind, WarningKind::BudgetExceeded { .. })
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.layer, self.reason())
    }
}

/// Result of one assembly
#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    pub items: Vec<ContextItem>,
    pub warnings: Vec<Warning>,
    pub total_tokens: usize,
    pub per_layer: BTreeMap<Layer, LayerSelection>,
}

impl Assembly {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Items of one layer, in assembled order
    pub fn layer_items(&self, layer: Layer) -> impl Iterator<Item = &ContextItem> {
        self.items
            .iter()
            .filter(move |item| item.origin_layer() == layer)
    }
}

/// Layered context cache with budgeted assembly.
///
/// Cheap to clone; clones share all cached state.
#[derive(Clone)]
pub struct ContextEngine {
    store: LayerStore,
    counter: TokenCounter,
    query_cache: Option<QueryCache>,
}

impl ContextEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Assemble context for `scope` under `budget`.
    ///
    /// Never fails: provider failures, budget overruns, and estimator failures are
    /// reported as warnings on the result.
    pub async fn assemble(&self, scope: &Scope, budget: &TokenBudget) -> Assembly {
        let started = Instant::now();
        let reads = join_all(
            Layer::PRIORITY
                .iter()
                .map(|&layer| self.store.get_items(scope, layer)),
        )
        .await;

        let mut warnings = Vec::new();
        for read in &reads {
            match &read.freshness {
                Freshness::Fresh => {}
                Freshness::Degraded(e) => warnings.push(Warning {
                    layer: read.layer,
                    kind: WarningKind::StaleFallback {
                        error: e.to_string(),
                    },
                }),
                Freshness::Unavailable(e) => warnings.push(Warning {
                    layer: read.layer,
                    kind: WarningKind::ProviderFailed {
                        error: e.to_string(),
                    },
                }),
            }
        }

        let layers: Vec<(Layer, &[ContextItem])> =
            reads.iter().map(|read| (read.layer, &read.items[..])).collect();
        let selection = budget::select(&layers, budget, &self.counter);

        if let Some(exceeded) = selection.budget_exceeded {
            warn!(
                scope = %scope,
                required = exceeded.required,
                available = exceeded.available,
                "Ephemeral input exceeds remaining budget, including it in full"
            );
            warnings.push(Warning {
                layer: Layer::Ephemeral,
                kind: WarningKind::BudgetExceeded {
                    required: exceeded.required,
                    available: exceeded.available,
                },
            });
        }
        for &layer in &selection.estimator_fallbacks {
            warnings.push(Warning {
                layer,
                kind: WarningKind::EstimatorFallback,
            });
        }

        for (layer, stats) in &selection.per_layer {
            if stats.dropped_items > 0 {
                debug!(
                    scope = %scope,
                    layer = %layer,
                    dropped_items = stats.dropped_items,
                    dropped_tokens = stats.dropped_tokens,
                    available = stats.available,
                    "Items dropped to fit budget"
                );
            }
        }
        info!(
            scope = %scope,
            items = selection.items.len(),
            total_tokens = selection.total_tokens,
            budget = budget.global_limit(),
            warnings = warnings.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Context assembled"
        );

        Assembly {
            items: selection.items,
            warnings,
            total_tokens: selection.total_tokens,
            per_layer: selection.per_layer,
        }
    }

    /// Mark a layer of a scope stale; the next assembly refreshes it.
    pub fn invalidate(&self, scope: &Scope, layer: Layer) -> bool {
        self.store.invalidate(scope, layer)
    }

    pub fn is_valid(&self, scope: &Scope, layer: Layer) -> bool {
        self.store.is_valid(scope, layer)
    }

    pub fn describe_cache(&self, scope: &Scope) -> Vec<LayerDescription> {
        self.store.describe(scope)
    }

    pub fn query_cache_stats(&self) -> Option<QueryCacheStats> {
        self.query_cache.as_ref().map(|cache| cache.stats())
    }

    pub fn query_cache(&self) -> Option<&QueryCache> {
        self.query_cache.as_ref()
    }

    /// Invalidator bound to this engine's layer store
    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.store.clone())
    }

    /// Drop all cached state for a finished session
    pub fn release_scope(&self, scope: &Scope) {
        let released = self.store.drop_scope(scope);
        debug!(scope = %scope, released, "Released scope state");
    }

    pub fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }
}

pub struct EngineBuilder {
    registry: ProviderRegistryBuilder,
    clock: Option<Arc<dyn Clock>>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    provider_timeout: Duration,
    query_cache: Option<QueryCache>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            registry: ProviderRegistry::builder(),
            clock: None,
            estimator: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            query_cache: None,
        }
    }
}

impl EngineBuilder {
    /// Apply TTL and timeout settings from configuration
    pub fn with_config(mut self, config: &StrataConfig) -> Self {
        if let Some(secs) = config.layers.semi_static.ttl_secs {
            self = self.ttl(Layer::SemiStatic, Ttl::Finite(Duration::from_secs(secs)));
        }
        if let Some(secs) = config.layers.dynamic.ttl_secs {
            self = self.ttl(Layer::Dynamic, Ttl::Finite(Duration::from_secs(secs)));
        }
        self.provider_timeout = Duration::from_millis(config.refresh.provider_timeout_ms);
        self
    }

    pub fn provider(mut self, layer: Layer, provider: Arc<dyn LayerProvider>) -> Self {
        self.registry = self.registry.provider(layer, provider);
        self
    }

    pub fn ttl(mut self, layer: Layer, ttl: Ttl) -> Self {
        self.registry = self.registry.ttl(layer, ttl);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Attach the query cache backing the Dynamic layer, for stats reporting
    pub fn query_cache(mut self, cache: QueryCache) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<ContextEngine, ConfigError> {
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "provider timeout must be non-zero".to_string(),
            ));
        }
        let registry = Arc::new(self.registry.build()?);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let counter = TokenCounter::new(
            self.estimator
                .unwrap_or_else(|| Arc::new(CharHeuristicEstimator)),
        );
        let store = LayerStore::new(registry, clock, counter.clone(), self.provider_timeout);
        Ok(ContextEngine {
            store,
            counter,
            query_cache: self.query_cache,
        })
    }
}
