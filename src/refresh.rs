//! Refresh coordination.
//!
//! Collapses concurrent requests for the same key into one execution whose outcome is
//! shared by every waiter. The shared work runs on its own task: a caller that stops
//! waiting never cancels it, so the cache is updated even if nobody is left to read it.

use crate::error::ProviderError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

type WaiterTable<K, V> = Arc<Mutex<HashMap<K, Vec<oneshot::Sender<V>>>>>;

/// In-flight table keyed by request identity
pub struct Singleflight<K, V> {
    calls: WaiterTable<K, V>,
}

impl<K, V> Singleflight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys with work currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.calls.lock().contains_key(key)
    }

    /// Run `work` for `key` unless an identical call is already in flight, then wait for
    /// the shared outcome.
    ///
    /// Only the first caller's `work` is invoked; later callers join its waiter list.
    /// Returns [`ProviderError::Aborted`] if the shared task died without an outcome.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut calls = self.calls.lock();
            match calls.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    calls.insert(key.clone(), vec![tx]);
                    true
                }
            }
        };

        if leader {
            let fut = work();
            let completion = Completion {
                calls: Arc::clone(&self.calls),
                key: Some(key),
            };
            tokio::spawn(async move {
                let value = fut.await;
                completion.finish(value);
            });
        } else {
            debug!(key = ?key, "Joined in-flight refresh");
        }

        rx.await.map_err(|_| ProviderError::Aborted)
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight marker and releases waiters. If the task unwinds before
/// `finish`, dropping this still clears the marker so later reads can retry.
struct Completion<K: Eq + Hash, V> {
    calls: WaiterTable<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V: Clone> Completion<K, V> {
    fn finish(mut self, value: V) {
        let waiters = match self.key.take() {
            Some(key) => self.calls.lock().remove(&key).unwrap_or_default(),
            None => Vec::new(),
        };
        for tx in waiters {
            // A waiter that gave up has dropped its receiver
            let _ = tx.send(value.clone());
        }
    }
}

impl<K: Eq + Hash, V> Drop for Completion<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.calls.lock().remove(&key);
        }
    }
}
