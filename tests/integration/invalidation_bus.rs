//! Signals flowing from the bus through the invalidator into layer state

use super::test_utils::{sized_item, StubProvider};
use std::sync::Arc;
use std::time::Duration;
use strata::clock::ManualClock;
use strata::invalidate::{SignalBus, SignalKind};
use strata::{ContextEngine, Layer, Scope, TokenBudget};

#[tokio::test]
async fn test_file_change_signal_refreshes_semi_static() {
    let provider = StubProvider::new(vec![sized_item(Layer::SemiStatic, 10, "readme")]);
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("s");
    let budget = TokenBudget::global(100);

    engine.assemble(&scope, &budget).await;
    assert!(engine.is_valid(&scope, Layer::SemiStatic));

    let (bus, receiver) = SignalBus::new_pair();
    let handle = engine.invalidator().spawn(receiver);
    // Repeated signals before the next read collapse into one refresh
    bus.emit(scope.clone(), SignalKind::FileChanged).unwrap();
    bus.emit(scope.clone(), SignalKind::FileChanged).unwrap();
    drop(bus);
    assert_eq!(handle.await.unwrap(), 2);

    assert!(!engine.is_valid(&scope, Layer::SemiStatic));
    provider.set_items(vec![sized_item(Layer::SemiStatic, 10, "readme-v2")]);
    let assembly = engine.assemble(&scope, &budget).await;
    assert_eq!(provider.calls(), 2);
    assert_eq!(assembly.items[0].source(), "readme-v2");
}

#[tokio::test]
async fn test_signal_only_touches_its_scope_and_layer() {
    let semi = StubProvider::new(vec![sized_item(Layer::SemiStatic, 10, "doc")]);
    let stat = StubProvider::new(vec![sized_item(Layer::Static, 10, "system")]);
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, semi.clone())
        .provider(Layer::Static, stat.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let budget = TokenBudget::global(100);
    let a = Scope::new("a");
    let b = Scope::new("b");
    engine.assemble(&a, &budget).await;
    engine.assemble(&b, &budget).await;

    let invalidator = engine.invalidator();
    assert!(invalidator.apply(&strata::invalidate::Signal {
        scope: a.clone(),
        kind: SignalKind::ConfigChanged,
    }));

    assert!(!engine.is_valid(&a, Layer::Static));
    assert!(engine.is_valid(&a, Layer::SemiStatic));
    assert!(engine.is_valid(&b, Layer::Static));
}

#[tokio::test]
async fn test_unknown_scope_signal_is_noop() {
    let engine = ContextEngine::builder()
        .provider(
            Layer::SemiStatic,
            StubProvider::new(vec![sized_item(Layer::SemiStatic, 10, "doc")]),
        )
        .build()
        .unwrap();
    assert!(!engine.invalidate(&Scope::new("never-seen"), Layer::SemiStatic));
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_refresh_marks_result_stale() {
    let provider = StubProvider::with_delay(
        vec![sized_item(Layer::SemiStatic, 10, "doc")],
        Duration::from_millis(100),
    );
    let engine = ContextEngine::builder()
        .provider(Layer::SemiStatic, provider.clone())
        .clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let scope = Scope::new("s");

    let reader = {
        let engine = engine.clone();
        let scope = scope.clone();
        tokio::spawn(async move { engine.assemble(&scope, &TokenBudget::global(100)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.invalidate(&scope, Layer::SemiStatic));

    let assembly = reader.await.unwrap();
    assert_eq!(assembly.items.len(), 1);
    assert!(!engine.is_valid(&scope, Layer::SemiStatic));

    engine.assemble(&scope, &TokenBudget::global(100)).await;
    assert_eq!(provider.calls(), 2);
}
