//! Integration tests for the Strata layered context cache

mod budget_law;
mod config_integration;
mod invalidation_bus;
mod layer_refresh;
mod query_cache_tiers;
mod retrieval_layer;
mod test_utils;
