//! Model catalogs and provider keys.
//!
//! The static catalog is an external collaborator: adapters only ever ask it
//! for `load_static_models(provider)`. Two implementations ship here, the
//! built-in lists and a TOML file that overrides them per provider.

pub mod provider_key;

pub use provider_key::ProviderKey;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::ModelDescriptor;

/// Read access to statically configured model lists.
pub trait ModelCatalog: Send + Sync {
    fn load_static_models(&self, provider: ProviderKey) -> Vec<ModelDescriptor>;
}

/// Built-in model lists, also the last-resort fallback of every adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl ModelCatalog for BuiltinCatalog {
    fn load_static_models(&self, provider: ProviderKey) -> Vec<ModelDescriptor> {
        builtin_models(provider)
    }
}

pub fn builtin_models(provider: ProviderKey) -> Vec<ModelDescriptor> {
    match provider {
        ProviderKey::GeminiWeb => vec![
            ModelDescriptor::new("gemini-web-fast", "Gemini Fast")
                .with_description("Fast tier of the Gemini web app")
                .with_context_length(1_048_576),
            ModelDescriptor::new("gemini-web-pro", "Gemini Pro")
                .with_description("Advanced tier of the Gemini web app")
                .with_context_length(1_048_576),
            ModelDescriptor::new("gemini-web-thinking", "Gemini Thinking")
                .with_description("Advanced tier with visible thoughts")
                .with_context_length(1_048_576)
                .thinking(),
        ],
        ProviderKey::QwenWeb => vec![
            ModelDescriptor::new("qwen3-max", "Qwen3-Max").with_context_length(262_144),
            ModelDescriptor::new("qwen-plus-2025-09-11", "Qwen-Plus").with_context_length(1_000_000),
            ModelDescriptor::new("qwen3-235b-a22b-thinking", "Qwen3 235B Thinking")
                .with_context_length(131_072)
                .thinking(),
            ModelDescriptor::new("qwen3-coder-plus", "Qwen3-Coder").with_context_length(1_048_576),
        ],
        ProviderKey::OpenAiCompatible => vec![
            ModelDescriptor::new("gpt-4o", "GPT-4o").with_context_length(128_000),
            ModelDescriptor::new("gpt-4o-mini", "GPT-4o mini").with_context_length(128_000),
            ModelDescriptor::new("o3-mini", "o3-mini")
                .with_context_length(200_000)
                .thinking(),
        ],
        ProviderKey::Ollama => vec![
            ModelDescriptor::new("llama3.2:latest", "Llama 3.2"),
            ModelDescriptor::new("qwen3:8b", "Qwen3 8B").thinking(),
        ],
    }
}

/// Model lists loaded from a TOML file of `[[<provider>]]` arrays.
///
/// Providers absent from the file fall back to the built-in lists.
#[derive(Debug, Clone, Default)]
pub struct TomlCatalog {
    models: BTreeMap<ProviderKey, Vec<ModelDescriptor>>,
}

impl TomlCatalog {
    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        let raw: BTreeMap<String, Vec<ModelDescriptor>> = toml::from_str(text)
            .map_err(|e| BridgeError::Configuration(format!("Invalid model catalog: {e}")))?;
        let mut models = BTreeMap::new();
        for (name, list) in raw {
            let key = ProviderKey::parse(&name).ok_or_else(|| {
                BridgeError::Configuration(format!("Unknown provider in model catalog: '{name}'"))
            })?;
            models.insert(key, list);
        }
        Ok(Self { models })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        Self::from_toml_str(&std::fs::read_to_string(path.as_ref())?)
    }
}

impl ModelCatalog for TomlCatalog {
    fn load_static_models(&self, provider: ProviderKey) -> Vec<ModelDescriptor> {
        self.models
            .get(&provider)
            .filter(|list| !list.is_empty())
            .cloned()
            .unwrap_or_else(|| builtin_models(provider))
    }
}

/// Catalog selected by the config: the models file when it loads, else built-in.
pub fn catalog_from_config(config: &BridgeConfig) -> Arc<dyn ModelCatalog> {
    match &config.models_file {
        Some(path) => match TomlCatalog::load(path) {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Falling back to built-in model catalog");
                Arc::new(BuiltinCatalog)
            }
        },
        None => Arc::new(BuiltinCatalog),
    }
}
