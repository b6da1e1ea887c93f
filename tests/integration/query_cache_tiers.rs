//! Query cache eviction, tiering, and shared search calls

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata::clock::ManualClock;
use strata::query_cache::{
    EvictionPolicy, QueryCache, QueryCacheConfig, QueryKey, SearchHit, SearchParams,
    SearchProvider, SledSlowTier,
};
use strata::{ContextItem, Layer, ProviderError};
use tempfile::TempDir;

fn config(capacity: usize) -> QueryCacheConfig {
    QueryCacheConfig {
        capacity,
        ttl: Duration::from_secs(30),
        policy: EvictionPolicy::Lru,
        search_timeout: Duration::from_secs(1),
    }
}

fn key(query: &str) -> QueryKey {
    QueryKey::new(query, &SearchParams::default())
}

fn results(tag: &str) -> Vec<ContextItem> {
    vec![ContextItem::new(Layer::Dynamic, tag).with_relevance(0.5)]
}

struct SlowSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for SlowSearch {
    async fn search(
        &self,
        query: &str,
        _params: &SearchParams,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(vec![SearchHit {
            content: format!("answer for {}", query),
            source: "kb".to_string(),
            score: 0.8,
            collection: None,
        }])
    }
}

#[test]
fn test_lru_evicts_least_recently_used() {
    let clock = Arc::new(ManualClock::new());
    let cache = QueryCache::in_memory(config(2), clock.clone());

    cache.put(key("a"), results("a"));
    clock.advance(Duration::from_millis(1));
    cache.put(key("b"), results("b"));
    clock.advance(Duration::from_millis(1));
    assert!(cache.get(&key("a")).is_some());
    clock.advance(Duration::from_millis(1));
    cache.put(key("c"), results("c"));

    assert!(cache.in_fast_tier(&key("a")));
    assert!(!cache.in_fast_tier(&key("b")));
    assert!(cache.in_fast_tier(&key("c")));
    assert_eq!(cache.stats().evictions, 1);

    // Demoted, not lost
    let b = cache.get(&key("b")).unwrap();
    assert_eq!(b.items, results("b"));
    assert!(cache.in_fast_tier(&key("b")));
}

#[test]
fn test_sled_slow_tier_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db = sled::open(temp_dir.path().join("cache")).unwrap();
    let clock = Arc::new(ManualClock::new());

    {
        let cache = QueryCache::new(
            config(4),
            Arc::new(SledSlowTier::with_db(&db).unwrap()),
            clock.clone(),
        );
        cache.put(key("deploy steps"), results("runbook"));
    }

    let restarted = QueryCache::new(
        config(4),
        Arc::new(SledSlowTier::with_db(&db).unwrap()),
        clock.clone(),
    );
    assert!(!restarted.in_fast_tier(&key("deploy steps")));
    let entry = restarted.get(&key("Deploy   Steps")).unwrap();
    assert_eq!(entry.items, results("runbook"));
    assert!(restarted.in_fast_tier(&key("deploy steps")));

    clock.advance(Duration::from_secs(31));
    assert!(restarted.get(&key("deploy steps")).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_search() {
    let cache = QueryCache::in_memory(config(8), Arc::new(ManualClock::new()));
    let search = Arc::new(SlowSearch {
        calls: AtomicUsize::new(0),
    });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let search: Arc<dyn SearchProvider> = search.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_search("why is the build red", &SearchParams::default(), search)
                .await
        }));
    }
    for handle in handles {
        let items = handle.await.unwrap().unwrap();
        assert_eq!(items[0].content(), "answer for why is the build red");
    }
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_search_timeout_is_provider_error() {
    let cache = QueryCache::in_memory(
        QueryCacheConfig {
            search_timeout: Duration::from_millis(10),
            ..config(2)
        },
        Arc::new(ManualClock::new()),
    );
    let search = Arc::new(SlowSearch {
        calls: AtomicUsize::new(0),
    });
    let result = cache
        .get_or_search("slow", &SearchParams::default(), search)
        .await;
    assert!(matches!(result, Err(ProviderError::Timeout(_))));
    assert!(cache.is_empty());
}
