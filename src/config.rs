//! Configuration System
//!
//! Hierarchical configuration: merge-policy defaults, then the global config file, then
//! workspace config files, then `STRATA__*` environment variables. Values are validated
//! before an engine is built from them.

use crate::budget::TokenBudget;
use crate::clock::Clock;
use crate::error::{ConfigError, StorageError};
use crate::logging::LoggingConfig;
use crate::query_cache::{
    EvictionPolicy, MemorySlowTier, QueryCache, QueryCacheConfig, SledSlowTier, SlowTier,
};
use crate::types::Layer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod facade;
mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub layers: LayersConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub query_cache: QueryCacheSettings,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TTL overrides for the layers whose TTL is configurable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayersConfig {
    #[serde(default)]
    pub semi_static: LayerTtlConfig,

    #[serde(default)]
    pub dynamic: LayerTtlConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerTtlConfig {
    /// Unset keeps the layer default
    pub ttl_secs: Option<u64>,
}

/// Token budget settings. Signed so negative values are reported, not silently wrapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_global_budget")]
    pub global: i64,

    #[serde(default)]
    pub per_layer: PerLayerBudgets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerLayerBudgets {
    #[serde(rename = "static")]
    pub static_layer: Option<i64>,
    pub semi_static: Option<i64>,
    pub dynamic: Option<i64>,
    pub ephemeral: Option<i64>,
}

fn default_global_budget() -> i64 {
    4096
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            global: default_global_budget(),
            per_layer: PerLayerBudgets::default(),
        }
    }
}

impl BudgetConfig {
    pub fn token_budget(&self) -> Result<TokenBudget, ConfigError> {
        TokenBudget::new(self.global, &self.per_layer.to_map())
    }
}

impl PerLayerBudgets {
    pub fn to_map(&self) -> BTreeMap<Layer, i64> {
        [
            (Layer::Static, self.static_layer),
            (Layer::SemiStatic, self.semi_static),
            (Layer::Dynamic, self.dynamic),
            (Layer::Ephemeral, self.ephemeral),
        ]
        .into_iter()
        .filter_map(|(layer, budget)| budget.map(|budget| (layer, budget)))
        .collect()
    }
}

/// Where the query cache keeps entries evicted from its fast tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlowTierKind {
    #[default]
    Memory,
    Sled,
}

/// Settings for the Dynamic-layer query cache.
///
/// Applications that register a search backend build their cache with
/// [`QueryCacheSettings::build_cache`]. The `strata` binary has no search backend, so it
/// only validates this section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCacheSettings {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub policy: EvictionPolicy,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    #[serde(default)]
    pub slow_tier: SlowTierKind,

    #[serde(default = "default_sled_path")]
    pub sled_path: PathBuf,
}

fn default_capacity() -> usize {
    128
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_search_timeout_ms() -> u64 {
    4_000
}

fn default_sled_path() -> PathBuf {
    PathBuf::from(".strata/query_cache")
}

impl Default for QueryCacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            policy: EvictionPolicy::default(),
            search_timeout_ms: default_search_timeout_ms(),
            slow_tier: SlowTierKind::default(),
            sled_path: default_sled_path(),
        }
    }
}

impl QueryCacheSettings {
    pub fn cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            capacity: self.capacity,
            ttl: Duration::from_secs(self.ttl_secs),
            policy: self.policy,
            search_timeout: Duration::from_millis(self.search_timeout_ms),
        }
    }

    pub fn open_slow_tier(&self) -> Result<Arc<dyn SlowTier>, StorageError> {
        match self.slow_tier {
            SlowTierKind::Memory => Ok(Arc::new(MemorySlowTier::new())),
            SlowTierKind::Sled => Ok(Arc::new(SledSlowTier::open(&self.sled_path)?)),
        }
    }

    /// Open the configured slow tier and put a cache in front of it
    pub fn build_cache(&self, clock: Arc<dyn Clock>) -> Result<QueryCache, StorageError> {
        Ok(QueryCache::new(self.cache_config(), self.open_slow_tier()?, clock))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Layer(Layer, String),
    Budget(String),
    QueryCache(String),
    Refresh(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Layer(layer, msg) => write!(f, "Layer '{}': {}", layer, msg),
            ValidationError::Budget(msg) => write!(f, "Budget: {}", msg),
            ValidationError::QueryCache(msg) => write!(f, "Query cache: {}", msg),
            ValidationError::Refresh(msg) => write!(f, "Refresh: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StrataConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (layer, settings) in [
            (Layer::SemiStatic, &self.layers.semi_static),
            (Layer::Dynamic, &self.layers.dynamic),
        ] {
            if settings.ttl_secs == Some(0) {
                errors.push(ValidationError::Layer(
                    layer,
                    "ttl_secs must be greater than zero".to_string(),
                ));
            }
        }

        if let Err(e) = self.budget.token_budget() {
            errors.push(ValidationError::Budget(e.to_string()));
        }

        let cache = &self.query_cache;
        if cache.capacity == 0 {
            errors.push(ValidationError::QueryCache(
                "capacity must be at least 1".to_string(),
            ));
        }
        if cache.ttl_secs == 0 {
            errors.push(ValidationError::QueryCache(
                "ttl_secs must be greater than zero".to_string(),
            ));
        }
        if cache.search_timeout_ms == 0 {
            errors.push(ValidationError::QueryCache(
                "search_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if cache.slow_tier == SlowTierKind::Sled && cache.sled_path.as_os_str().is_empty() {
            errors.push(ValidationError::QueryCache(
                "sled_path cannot be empty when slow_tier is sled".to_string(),
            ));
        }

        if self.refresh.provider_timeout_ms == 0 {
            errors.push(ValidationError::Refresh(
                "provider_timeout_ms must be greater than zero".to_string(),
            ));
        } else if cache.search_timeout_ms > self.refresh.provider_timeout_ms {
            // The retrieval layer runs its search inside the provider timeout
            errors.push(ValidationError::QueryCache(format!(
                "search_timeout_ms ({}) must not exceed refresh.provider_timeout_ms ({})",
                cache.search_timeout_ms, self.refresh.provider_timeout_ms
            )));
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold all errors into one `ConfigError`
    pub fn validated(self) -> Result<Self, ConfigError> {
        match self.validate() {
            Ok(()) => Ok(self),
            Err(errors) => Err(ConfigError::InvalidConfiguration(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}
