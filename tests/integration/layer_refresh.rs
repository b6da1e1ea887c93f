//! Coordinated refresh, TTL expiry, and stale fallback through the engine

use super::test_utils::{sized_item, StubProvider};
use std::sync::Arc;
use std::time::Duration;
use strata::clock::ManualClock;
use strata::{ContextEngine, Layer, Scope, TokenBudget, Ttl, WarningKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_share_one_refresh() {
    let provider = StubProvider::with_delay(
        vec![sized_item(Layer::SemiStatic, 10, "doc")],
        Duration::from_millis(50),
    );
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("session-1");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let scope = scope.clone();
        handles.push(tokio::spawn(async move {
            engine.assemble(&scope, &TokenBudget::global(100)).await
        }));
    }
    for handle in handles {
        let assembly = handle.await.unwrap();
        assert_eq!(assembly.items.len(), 1);
        assert!(assembly.warnings.is_empty());
    }

    assert_eq!(provider.calls(), 1);
    assert!(provider.max_concurrent() <= 1);
}

#[tokio::test]
async fn test_scopes_refresh_independently() {
    let provider = StubProvider::new(vec![sized_item(Layer::SemiStatic, 10, "doc")]);
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();

    let budget = TokenBudget::global(100);
    engine.assemble(&Scope::new("a"), &budget).await;
    engine.assemble(&Scope::new("b"), &budget).await;
    engine.assemble(&Scope::new("a"), &budget).await;
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_assembly_is_idempotent() {
    let engine = ContextEngine::builder()
        .provider(
            Layer::Static,
            StubProvider::new(vec![sized_item(Layer::Static, 20, "system")]),
        )
        .provider(
            Layer::Dynamic,
            StubProvider::new(vec![
                sized_item(Layer::Dynamic, 10, "a").with_relevance(0.2),
                sized_item(Layer::Dynamic, 10, "b").with_relevance(0.7),
            ]),
        )
        .provider(
            Layer::Ephemeral,
            StubProvider::new(vec![sized_item(Layer::Ephemeral, 5, "turn")]),
        )
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("s");
    let budget = TokenBudget::global(40);

    let first = engine.assemble(&scope, &budget).await;
    let second = engine.assemble(&scope, &budget).await;
    assert_eq!(first.items, second.items);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.total_tokens, 35);
}

#[tokio::test]
async fn test_dynamic_ttl_boundary() {
    let clock = Arc::new(ManualClock::new());
    let provider = StubProvider::new(vec![sized_item(Layer::Dynamic, 10, "hit")]);
    let engine = ContextEngine::builder()
        .provider(Layer::Dynamic, provider.clone())
        .ttl(Layer::Dynamic, Ttl::Finite(Duration::from_secs(30)))
        .clock(clock.clone())
        .build()
        .unwrap();
    let scope = Scope::new("s");
    let budget = TokenBudget::global(100);

    engine.assemble(&scope, &budget).await;
    assert_eq!(provider.calls(), 1);

    clock.advance(Duration::from_secs(29));
    assert!(engine.is_valid(&scope, Layer::Dynamic));
    engine.assemble(&scope, &budget).await;
    assert_eq!(provider.calls(), 1);

    clock.advance(Duration::from_secs(2));
    assert!(!engine.is_valid(&scope, Layer::Dynamic));
    engine.assemble(&scope, &budget).await;
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_ephemeral_never_cached() {
    let provider = StubProvider::new(vec![sized_item(Layer::Ephemeral, 5, "turn")]);
    let engine = ContextEngine::builder()
        .provider(Layer::Ephemeral, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("s");

    for _ in 0..3 {
        engine.assemble(&scope, &TokenBudget::global(100)).await;
    }
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_stale_fallback_after_provider_failure() {
    let clock = Arc::new(ManualClock::new());
    let provider = StubProvider::new(vec![
        sized_item(Layer::SemiStatic, 10, "guide"),
        sized_item(Layer::SemiStatic, 10, "faq"),
    ]);
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    let scope = Scope::new("s");
    let budget = TokenBudget::global(100);

    let fresh = engine.assemble(&scope, &budget).await;
    assert!(fresh.warnings.is_empty());

    provider.set_failing(true);
    clock.advance(Duration::from_secs(301));
    let degraded = engine.assemble(&scope, &budget).await;

    assert_eq!(degraded.items, fresh.items);
    assert_eq!(degraded.warnings.len(), 1);
    assert_eq!(degraded.warnings[0].layer, Layer::SemiStatic);
    assert!(matches!(
        degraded.warnings[0].kind,
        WarningKind::StaleFallback { .. }
    ));

    let description = engine
        .describe_cache(&scope)
        .into_iter()
        .find(|d| d.layer == Layer::SemiStatic)
        .unwrap();
    assert!(description.stale);
    assert_eq!(description.item_count, 2);
    assert!(description.last_error.is_some());

    // Recovery replaces the stale set and clears the error
    provider.set_failing(false);
    provider.set_items(vec![sized_item(Layer::SemiStatic, 10, "guide-v2")]);
    let recovered = engine.assemble(&scope, &budget).await;
    assert!(recovered.warnings.is_empty());
    assert_eq!(recovered.items.len(), 1);
    assert_eq!(recovered.items[0].source(), "guide-v2");
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out() {
    let provider = StubProvider::with_delay(
        vec![sized_item(Layer::SemiStatic, 10, "doc")],
        Duration::from_millis(200),
    );
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider)
        .provider_timeout(Duration::from_millis(20))
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();

    let assembly = engine
        .assemble(&Scope::new("s"), &TokenBudget::global(100))
        .await;
    assert!(assembly.items.is_empty());
    assert!(matches!(
        &assembly.warnings[0].kind,
        WarningKind::ProviderFailed { error } if error.contains("timed out")
    ));
}

#[tokio::test]
async fn test_release_scope_forgets_state() {
    let provider = StubProvider::new(vec![sized_item(Layer::SemiStatic, 10, "doc")]);
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("s");

    engine.assemble(&scope, &TokenBudget::global(100)).await;
    engine.release_scope(&scope);
    assert!(!engine.is_valid(&scope, Layer::SemiStatic));
    engine.assemble(&scope, &TokenBudget::global(100)).await;
    assert_eq!(provider.calls(), 2);
}
