//! Invalidator
//!
//! Translates external change signals into layer-scoped invalidation. Invalidation is
//! advisory: it only flips a layer's staleness marker, and the next read performs the
//! coordinated refresh.

use crate::layer::LayerStore;
use crate::types::{Layer, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Kinds of external change the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A file or document the snapshots were built from changed
    FileChanged,
    /// The conversation moved to a new topic
    TopicChanged,
    /// Configuration or the system prompt changed
    ConfigChanged,
}

impl SignalKind {
    pub fn default_layer(self) -> Layer {
        match self {
            SignalKind::FileChanged => Layer::SemiStatic,
            SignalKind::TopicChanged => Layer::Dynamic,
            SignalKind::ConfigChanged => Layer::Static,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub scope: Scope,
    pub kind: SignalKind,
}

pub type SignalReceiver = UnboundedReceiver<Signal>;

/// In-process bus carrying invalidation signals to an [`Invalidator`]
#[derive(Clone)]
pub struct SignalBus {
    sender: UnboundedSender<Signal>,
}

impl SignalBus {
    pub fn new_pair() -> (Self, SignalReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, scope: Scope, kind: SignalKind) -> Result<(), SendError<Signal>> {
        self.sender.send(Signal { scope, kind })
    }
}

pub struct Invalidator {
    store: LayerStore,
    routes: HashMap<SignalKind, Layer>,
}

impl Invalidator {
    pub fn new(store: LayerStore) -> Self {
        Self {
            store,
            routes: HashMap::new(),
        }
    }

    /// Send a signal kind to a layer other than its default
    pub fn with_route(mut self, kind: SignalKind, layer: Layer) -> Self {
        self.routes.insert(kind, layer);
        self
    }

    pub fn target(&self, kind: SignalKind) -> Layer {
        self.routes
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_layer())
    }

    /// Apply one signal. Returns whether cached state existed to invalidate.
    pub fn apply(&self, signal: &Signal) -> bool {
        let layer = self.target(signal.kind);
        let invalidated = self.store.invalidate(&signal.scope, layer);
        debug!(
            scope = %signal.scope,
            kind = ?signal.kind,
            layer = %layer,
            invalidated,
            "Applied invalidation signal"
        );
        invalidated
    }

    /// Consume signals until every bus sender is dropped.
    ///
    /// The returned handle resolves to the number of signals processed.
    pub fn spawn(self, mut receiver: SignalReceiver) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut processed = 0usize;
            while let Some(signal) = receiver.recv().await {
                self.apply(&signal);
                processed += 1;
            }
            info!(processed, "Signal bus closed, invalidator stopping");
            processed
        })
    }
}
