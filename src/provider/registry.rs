//! Routing model ids to adapters.

use std::sync::Arc;

use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::models::{catalog_from_config, ModelCatalog, ProviderKey};

use super::gemini_web::GeminiWebAdapter;
use super::ollama::OllamaAdapter;
use super::openai_compatible::OpenAiCompatibleAdapter;
use super::qwen_web::QwenWebAdapter;
use super::routes::{register_routes, Router};
use super::ChatAdapter;

/// Ordered set of adapters; the first whose predicate matches wins.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ChatAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four built-in adapters sharing one catalog.
    pub fn with_defaults(config: &BridgeConfig, catalog: Arc<dyn ModelCatalog>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OllamaAdapter::from_config(config, catalog.clone())));
        registry.register(Arc::new(GeminiWebAdapter::from_config(config, catalog.clone())));
        registry.register(Arc::new(QwenWebAdapter::from_config(config, catalog.clone())));
        registry.register(Arc::new(OpenAiCompatibleAdapter::from_config(config, catalog)));
        registry
    }

    /// Defaults with the catalog the config selects.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_defaults(config, catalog_from_config(config))
    }

    pub fn register(&mut self, adapter: Arc<dyn ChatAdapter>) {
        debug!(provider = %adapter.provider_key(), "Registered adapter");
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Arc<dyn ChatAdapter>] {
        &self.adapters
    }

    pub fn get(&self, key: ProviderKey) -> Option<Arc<dyn ChatAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.provider_key() == key)
            .cloned()
    }

    /// Adapter responsible for `model_id`.
    pub fn route(&self, model_id: &str) -> Result<Arc<dyn ChatAdapter>, BridgeError> {
        self.adapters
            .iter()
            .find(|adapter| adapter.is_model_supported(model_id))
            .cloned()
            .ok_or_else(|| BridgeError::ModelNotFound(model_id.to_string()))
    }

    /// Register every adapter's routes on the host router.
    pub fn register_routes(&self, router: &mut dyn Router) {
        for adapter in &self.adapters {
            register_routes(Arc::clone(adapter), router);
        }
    }
}
