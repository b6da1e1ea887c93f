//! Dynamic layer backed by the query cache, refreshed by topic changes

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata::clock::ManualClock;
use strata::invalidate::{SignalBus, SignalKind};
use strata::query_cache::{
    QueryCache, QueryCacheConfig, RetrievalProvider, SearchHit, SearchParams, SearchProvider,
    TopicBoard,
};
use strata::{ContextEngine, Layer, ProviderError, Scope, TokenBudget};

struct TopicSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for TopicSearch {
    async fn search(
        &self,
        query: &str,
        _params: &SearchParams,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SearchHit {
            content: format!("about {}", query),
            source: format!("kb/{}.md", query),
            score: 0.7,
            collection: Some("kb".to_string()),
        }])
    }
}

fn contents(assembly: &strata::Assembly) -> Vec<&str> {
    assembly
        .layer_items(Layer::Dynamic)
        .map(|item| item.content())
        .collect()
}

async fn wait_until_stale(engine: &ContextEngine, scope: &Scope) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while engine.is_valid(scope, Layer::Dynamic) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_topic_change_refreshes_retrieval_through_cache() {
    let clock = Arc::new(ManualClock::new());
    let cache = QueryCache::in_memory(QueryCacheConfig::default(), clock.clone());
    let search = Arc::new(TopicSearch {
        calls: AtomicUsize::new(0),
    });
    let (bus, mut receiver) = SignalBus::new_pair();
    let topics = Arc::new(TopicBoard::with_bus(bus));
    let provider = RetrievalProvider::new(
        cache.clone(),
        search.clone(),
        topics.clone(),
        SearchParams::default(),
    );
    let engine = ContextEngine::builder()
        .provider(Layer::Dynamic, Arc::new(provider))
        .query_cache(cache)
        .clock(clock.clone())
        .build()
        .unwrap();
    let scope = Scope::new("session");
    let budget = TokenBudget::global(100);

    // First topic, before any layer state exists
    assert!(topics.set_topic(&scope, "alpha"));
    assert_eq!(
        receiver.try_recv().map(|signal| signal.kind).ok(),
        Some(SignalKind::TopicChanged)
    );
    let first = engine.assemble(&scope, &budget).await;
    assert_eq!(contents(&first), vec!["about alpha"]);
    assert!(first.warnings.is_empty());

    let handle = engine.invalidator().spawn(receiver);

    assert!(topics.set_topic(&scope, "beta"));
    wait_until_stale(&engine, &scope).await;
    let second = engine.assemble(&scope, &budget).await;
    assert_eq!(contents(&second), vec!["about beta"]);
    let item = second.layer_items(Layer::Dynamic).next().unwrap();
    assert_eq!(item.source(), "kb/beta.md");
    assert_eq!(item.metadata().annotations["rank"], "0");

    let stats = engine.query_cache_stats().unwrap();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.size, 2);
    assert_eq!(search.calls.load(Ordering::SeqCst), 2);

    // Within the layer TTL the provider is not consulted at all
    clock.advance(Duration::from_secs(10));
    let third = engine.assemble(&scope, &budget).await;
    assert_eq!(contents(&third), vec!["about beta"]);
    assert_eq!(search.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.query_cache_stats().unwrap().misses, 2);

    // Returning to an earlier topic refreshes the layer from the cache
    assert!(topics.set_topic(&scope, "alpha"));
    wait_until_stale(&engine, &scope).await;
    let fourth = engine.assemble(&scope, &budget).await;
    assert_eq!(contents(&fourth), vec!["about alpha"]);
    assert_eq!(search.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.query_cache_stats().unwrap().hits, 1);

    // Clearing the topic empties the layer
    assert!(topics.clear(&scope));
    wait_until_stale(&engine, &scope).await;
    let fifth = engine.assemble(&scope, &budget).await;
    assert!(contents(&fifth).is_empty());

    // The board's bus sender lives as long as the engine, so stop the consumer directly
    handle.abort();
}
