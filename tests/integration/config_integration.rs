//! Configuration files driving engine construction

use super::test_utils::{sized_item, StubProvider};
use std::sync::Arc;
use std::time::Duration;
use strata::clock::ManualClock;
use strata::config::{ConfigLoader, SlowTierKind};
use strata::{ContextEngine, Layer, Scope};
use tempfile::TempDir;

#[tokio::test]
async fn test_engine_built_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("strata.toml");
    std::fs::write(
        &config_path,
        r#"
[layers.dynamic]
ttl_secs = 5

[budget]
global = 300

[budget.per_layer]
static = 100
ephemeral = 100

[query_cache]
search_timeout_ms = 800

[refresh]
provider_timeout_ms = 1000
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_path)
        .unwrap()
        .validated()
        .unwrap();
    let budget = config.budget.token_budget().unwrap();
    assert_eq!(budget.reserved_minimum(), 200);

    let clock = Arc::new(ManualClock::new());
    let provider = StubProvider::new(vec![sized_item(Layer::Dynamic, 10, "hit")]);
    let engine = ContextEngine::builder()
        .with_config(&config)
        .provider(Layer::Dynamic, provider.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let scope = Scope::new("s");

    engine.assemble(&scope, &budget).await;
    clock.advance(Duration::from_secs(6));
    engine.assemble(&scope, &budget).await;
    assert_eq!(provider.calls(), 2);
}

#[test]
fn test_invalid_budget_config_reported() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("strata.toml");
    std::fs::write(
        &config_path,
        "[budget]\nglobal = 100\n\n[budget.per_layer]\nstatic = 80\nephemeral = 80\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_path).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().starts_with("Budget:"));
}

#[tokio::test]
async fn test_sled_query_cache_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("strata.toml");
    let sled_path = temp_dir.path().join("qc");
    std::fs::write(
        &config_path,
        format!(
            "[query_cache]\ncapacity = 4\npolicy = \"relevance\"\nslow_tier = \"sled\"\nsled_path = {:?}\n",
            sled_path.to_string_lossy()
        ),
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_path).unwrap();
    assert_eq!(config.query_cache.slow_tier, SlowTierKind::Sled);

    let cache = config
        .query_cache
        .build_cache(Arc::new(ManualClock::new()))
        .unwrap();
    let engine = ContextEngine::builder()
        .with_config(&config)
        .query_cache(cache.clone())
        .build()
        .unwrap();

    assert_eq!(cache.config().capacity, 4);
    assert_eq!(cache.config().search_timeout, Duration::from_secs(4));
    assert_eq!(engine.query_cache_stats().unwrap().slow_size, 0);
    assert!(sled_path.exists());
}
