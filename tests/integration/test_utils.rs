//! Shared stub providers and item builders for integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata::{ContextItem, Layer, LayerProvider, ProviderError, Scope};

/// Item whose default (4 chars per token) estimate is exactly `tokens`
pub fn sized_item(layer: Layer, tokens: usize, tag: &str) -> ContextItem {
    let mut content = format!("{}:", tag);
    content.push_str(&"x".repeat(tokens * 4 - content.len()));
    ContextItem::new(layer, content).with_source(tag)
}

/// Provider that records how often, and how concurrently, it is called
pub struct StubProvider {
    items: Mutex<Vec<ContextItem>>,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl StubProvider {
    pub fn new(items: Vec<ContextItem>) -> Arc<Self> {
        Self::with_delay(items, Duration::ZERO)
    }

    pub fn with_delay(items: Vec<ContextItem>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            delay,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn set_items(&self, items: Vec<ContextItem>) {
        *self.items.lock() = items;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LayerProvider for StubProvider {
    async fn fetch(&self, _scope: &Scope) -> Result<Vec<ContextItem>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::failed("stub offline"));
        }
        Ok(self.items.lock().clone())
    }

    fn name(&self) -> &str {
        "stub"
    }
}
