//! Layer refresh providers and the shared provider registry.

use crate::error::{ConfigError, ProviderError};
use crate::types::{ContextItem, Layer, Scope, Ttl};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Produces the current item set for one layer of one scope.
#[async_trait]
pub trait LayerProvider: Send + Sync {
    async fn fetch(&self, scope: &Scope) -> Result<Vec<ContextItem>, ProviderError>;

    /// Name used in log fields
    fn name(&self) -> &str {
        "provider"
    }
}

/// Adapts an async closure into a [`LayerProvider`]
pub struct FnProvider<F> {
    name: String,
    f: F,
}

impl<F> FnProvider<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> LayerProvider for FnProvider<F>
where
    F: Fn(Scope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<ContextItem>, ProviderError>> + Send,
{
    async fn fetch(&self, scope: &Scope) -> Result<Vec<ContextItem>, ProviderError> {
        (self.f)(scope.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Per-layer freshness settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSettings {
    pub ttl: Ttl,
}

#[derive(Clone)]
struct RegisteredProvider {
    provider: Arc<dyn LayerProvider>,
}

/// Immutable table of providers and layer settings, shared by every scope.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Layer, RegisteredProvider>,
    settings: HashMap<Layer, LayerSettings>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn provider(&self, layer: Layer) -> Option<Arc<dyn LayerProvider>> {
        self.providers
            .get(&layer)
            .map(|registered| Arc::clone(&registered.provider))
    }

    pub fn has_provider(&self, layer: Layer) -> bool {
        self.providers.contains_key(&layer)
    }

    pub fn settings(&self, layer: Layer) -> LayerSettings {
        self.settings
            .get(&layer)
            .copied()
            .unwrap_or(LayerSettings {
                ttl: layer.default_ttl(),
            })
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: HashMap<Layer, RegisteredProvider>,
    ttls: HashMap<Layer, Ttl>,
}

impl ProviderRegistryBuilder {
    pub fn provider(mut self, layer: Layer, provider: Arc<dyn LayerProvider>) -> Self {
        self.providers
            .insert(layer, RegisteredProvider { provider });
        self
    }

    /// Override a layer's TTL. Only `SemiStatic` and `Dynamic` are tunable.
    pub fn ttl(mut self, layer: Layer, ttl: Ttl) -> Self {
        self.ttls.insert(layer, ttl);
        self
    }

    pub fn build(self) -> Result<ProviderRegistry, ConfigError> {
        let mut settings = HashMap::new();
        for layer in Layer::ALL {
            let ttl = match self.ttls.get(&layer) {
                Some(&ttl) => ttl,
                None => layer.default_ttl(),
            };
            match layer {
                Layer::Static | Layer::Ephemeral if ttl != layer.default_ttl() => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "TTL of the {} layer is fixed at {}",
                        layer,
                        layer.default_ttl()
                    )));
                }
                Layer::SemiStatic | Layer::Dynamic if !ttl.is_cacheable() => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "TTL of the {} layer must be non-zero",
                        layer
                    )));
                }
                _ => {}
            }
            settings.insert(layer, LayerSettings { ttl });
        }
        Ok(ProviderRegistry {
            providers: self.providers,
            settings,
        })
    }
}
