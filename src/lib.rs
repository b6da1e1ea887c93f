//! Strata: Layered Context Cache
//!
//! Assembles prompt context from four layers with different freshness policies
//! (static system prompts, semi-static document snapshots, dynamic retrieval results,
//! and the ephemeral current turn), caching each layer per session scope and fitting
//! the result into a token budget.

pub mod budget;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod invalidate;
pub mod layer;
pub mod logging;
pub mod query_cache;
pub mod refresh;
pub mod snapshot;
pub mod token;
pub mod types;

pub use budget::TokenBudget;
pub use engine::{Assembly, ContextEngine, EngineBuilder, Warning, WarningKind};
pub use error::{ConfigError, EstimatorError, ProviderError, StorageError};
pub use layer::{FnProvider, LayerProvider};
pub use types::{ContextItem, Layer, Scope, Ttl};
