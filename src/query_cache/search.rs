//! Search provider contract and the Dynamic-layer retrieval provider built on it.

use super::key::SearchParams;
use super::QueryCache;
use crate::error::ProviderError;
use crate::invalidate::{SignalBus, SignalKind};
use crate::layer::LayerProvider;
use crate::types::{ContextItem, Layer, Scope};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    pub score: f32,
    pub collection: Option<String>,
}

impl SearchHit {
    pub(crate) fn into_item(self, rank: usize) -> ContextItem {
        let item = ContextItem::new(Layer::Dynamic, self.content)
            .with_source(self.source)
            .with_relevance(self.score)
            .with_annotation("rank", rank.to_string());
        match self.collection {
            Some(collection) => item.with_annotation("collection", collection),
            None => item,
        }
    }
}

/// Embedding / full-text search backend. Opaque to the engine.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>, ProviderError>;
}

/// Supplies the query the Dynamic layer should retrieve for, per scope
pub trait QuerySource: Send + Sync {
    fn current_query(&self, scope: &Scope) -> Option<String>;
}

impl<F> QuerySource for F
where
    F: Fn(&Scope) -> Option<String> + Send + Sync,
{
    fn current_query(&self, scope: &Scope) -> Option<String> {
        self(scope)
    }
}

/// Current conversation topic per scope.
///
/// Changing a scope's topic emits a `TopicChanged` signal when a bus is attached, so the
/// Dynamic layer refreshes on its next read.
#[derive(Default)]
pub struct TopicBoard {
    topics: RwLock<HashMap<Scope, String>>,
    bus: Option<SignalBus>,
}

impl TopicBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(bus: SignalBus) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            bus: Some(bus),
        }
    }

    /// Set the topic; returns `true` if it changed
    pub fn set_topic(&self, scope: &Scope, topic: impl Into<String>) -> bool {
        let topic = topic.into();
        let changed = {
            let mut topics = self.topics.write();
            match topics.get(scope) {
                Some(current) if *current == topic => false,
                _ => {
                    topics.insert(scope.clone(), topic);
                    true
                }
            }
        };
        if changed {
            self.notify(scope);
        }
        changed
    }

    /// Forget the scope's topic; returns `true` if one was set.
    ///
    /// Signals `TopicChanged` like [`set_topic`](Self::set_topic), since the Dynamic layer
    /// goes from some results to none.
    pub fn clear(&self, scope: &Scope) -> bool {
        let removed = self.topics.write().remove(scope).is_some();
        if removed {
            self.notify(scope);
        }
        removed
    }

    fn notify(&self, scope: &Scope) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.emit(scope.clone(), SignalKind::TopicChanged) {
                warn!(scope = %scope, error = %e, "Failed to emit topic change signal");
            }
        }
    }
}

impl QuerySource for TopicBoard {
    fn current_query(&self, scope: &Scope) -> Option<String> {
        self.topics.read().get(scope).cloned()
    }
}

/// [`LayerProvider`] for the Dynamic layer: retrieves for the scope's current query
/// through the query cache.
pub struct RetrievalProvider {
    cache: QueryCache,
    search: Arc<dyn SearchProvider>,
    queries: Arc<dyn QuerySource>,
    params: SearchParams,
}

impl RetrievalProvider {
    pub fn new(
        cache: QueryCache,
        search: Arc<dyn SearchProvider>,
        queries: Arc<dyn QuerySource>,
        params: SearchParams,
    ) -> Self {
        Self {
            cache,
            search,
            queries,
            params,
        }
    }
}

#[async_trait]
impl LayerProvider for RetrievalProvider {
    async fn fetch(&self, scope: &Scope) -> Result<Vec<ContextItem>, ProviderError> {
        let Some(query) = self.queries.current_query(scope) else {
            debug!(scope = %scope, "No active query, retrieval layer empty");
            return Ok(Vec::new());
        };
        let items = self
            .cache
            .get_or_search(&query, &self.params, Arc::clone(&self.search))
            .await?;
        Ok(items.to_vec())
    }

    fn name(&self) -> &str {
        "retrieval"
    }
}
