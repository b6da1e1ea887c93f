//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("budget.global", 4096_i64)?
        .set_default("query_cache.capacity", 128_i64)?
        .set_default("query_cache.ttl_secs", 30_i64)?
        .set_default("query_cache.policy", "lru")?
        .set_default("query_cache.search_timeout_ms", 4_000_i64)?
        .set_default("query_cache.slow_tier", "memory")?
        .set_default("refresh.provider_timeout_ms", 5_000_i64)
}
