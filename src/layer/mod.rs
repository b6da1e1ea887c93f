//! Layer Store
//!
//! Per-tier containers holding cached items, freshness metadata, and the pluggable
//! refresh function for each layer.

pub mod provider;
pub mod state;
pub mod store;

pub use provider::{FnProvider, LayerProvider, LayerSettings, ProviderRegistry, ProviderRegistryBuilder};
pub use state::{LayerDescription, LayerState};
pub use store::{Freshness, LayerRead, LayerStore};
