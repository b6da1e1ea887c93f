//! Core value types: scopes, layers, and context items.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque partition key for cached layer state (an agent or session id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope(String);

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Scope(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(id: &str) -> Self {
        Scope::new(id)
    }
}

/// Logical tier a context item belongs to. Each tier carries its own freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// System prompts. Never expires on its own; only a config change invalidates it.
    Static,
    /// Codebase and documentation snapshots (minutes).
    SemiStatic,
    /// Retrieval results tied to the live conversation (seconds).
    Dynamic,
    /// The current turn's raw input. Recomputed on every call.
    Ephemeral,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::Static,
        Layer::SemiStatic,
        Layer::Dynamic,
        Layer::Ephemeral,
    ];

    /// Order in which layers claim budget during assembly
    pub const PRIORITY: [Layer; 4] = [
        Layer::Static,
        Layer::Ephemeral,
        Layer::Dynamic,
        Layer::SemiStatic,
    ];

    pub fn default_ttl(self) -> Ttl {
        match self {
            Layer::Static => Ttl::Infinite,
            Layer::SemiStatic => Ttl::Finite(Duration::from_secs(300)),
            Layer::Dynamic => Ttl::Finite(Duration::from_secs(30)),
            Layer::Ephemeral => Ttl::Finite(Duration::ZERO),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Static => "static",
            Layer::SemiStatic => "semi_static",
            Layer::Dynamic => "dynamic",
            Layer::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum age of cached content before it is considered stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    Infinite,
    Finite(Duration),
}

impl Ttl {
    /// `false` for a zero TTL: such layers never hold state across calls.
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Ttl::Finite(d) if d.is_zero())
    }

    /// Content of the given age is still fresh iff `age < ttl`.
    pub fn admits(self, age: Duration) -> bool {
        match self {
            Ttl::Infinite => true,
            Ttl::Finite(ttl) => age < ttl,
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Infinite => f.write_str("infinite"),
            Ttl::Finite(d) => write!(f, "{}s", d.as_secs_f64()),
        }
    }
}

/// Descriptive metadata attached to a context item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Where the item came from (file path, document id, "system-prompt", ...)
    pub source: String,
    /// Relevance in [0, 1]; absent for unranked content
    pub relevance: Option<f32>,
    /// Free-form annotations, ordered for deterministic output
    pub annotations: BTreeMap<String, String>,
}

/// One unit of context to prepend to a generative request.
///
/// Immutable once built. The token count is never stored here; it is always derived
/// through the engine's estimator so the two cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    content: String,
    origin_layer: Layer,
    metadata: ItemMetadata,
}

impl ContextItem {
    pub fn new(origin_layer: Layer, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            origin_layer,
            metadata: ItemMetadata::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    /// Set the relevance score. Values are clamped into [0, 1]; NaN clears the score.
    pub fn with_relevance(mut self, score: f32) -> Self {
        self.metadata.relevance = if score.is_nan() {
            None
        } else {
            Some(score.clamp(0.0, 1.0))
        };
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Re-tag the item with the layer that actually served it
    pub fn with_origin(mut self, layer: Layer) -> Self {
        self.origin_layer = layer;
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn origin_layer(&self) -> Layer {
        self.origin_layer
    }

    pub fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }

    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    pub fn relevance(&self) -> Option<f32> {
        self.metadata.relevance
    }

    /// Score used for ranking; an absent score ranks as 0
    pub fn rank_score(&self) -> f32 {
        self.metadata.relevance.unwrap_or(0.0)
    }
}
