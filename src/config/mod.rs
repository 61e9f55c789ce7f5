//! Configuration system (layered: built-in defaults < config file < env).
//!
//! Everything a provider checks about the "browser" sending a request
//! (user agent, origin, referer, extra headers, fallback build label) lives in
//! a [`ProviderProfile`], so it can be updated without touching request
//! building or decoding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::models::ProviderKey;

/// Desktop Chrome user agent presented to browser-session providers.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Last build label known to be accepted by the Gemini chat backend.
pub const GEMINI_FALLBACK_BUILD_LABEL: &str = "boq_assistant-bard-web-server_20250514.06_p0";

const API_USER_AGENT: &str = concat!("webchat-bridge/", env!("CARGO_PKG_VERSION"));

/// Per-provider transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub base_url: String,
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub user_agent: String,
    /// Language tag sent in payloads and `hl` query parameters.
    pub language: String,
    pub extra_headers: BTreeMap<String, String>,
    pub fallback_build_label: Option<String>,
}

impl ProviderProfile {
    /// Built-in profile for a provider.
    pub fn builtin(key: ProviderKey) -> Self {
        match key {
            ProviderKey::GeminiWeb => Self {
                base_url: "https://gemini.google.com".into(),
                origin: Some("https://gemini.google.com".into()),
                referer: Some("https://gemini.google.com/".into()),
                user_agent: DESKTOP_USER_AGENT.into(),
                language: "en".into(),
                extra_headers: BTreeMap::from([("X-Same-Domain".to_string(), "1".to_string())]),
                fallback_build_label: Some(GEMINI_FALLBACK_BUILD_LABEL.into()),
            },
            ProviderKey::QwenWeb => Self {
                base_url: "https://chat.qwen.ai".into(),
                origin: Some("https://chat.qwen.ai".into()),
                referer: Some("https://chat.qwen.ai/".into()),
                user_agent: DESKTOP_USER_AGENT.into(),
                language: "en-US".into(),
                extra_headers: BTreeMap::from([("source".to_string(), "web".to_string())]),
                fallback_build_label: None,
            },
            ProviderKey::OpenAiCompatible => Self::api("https://api.openai.com/v1"),
            ProviderKey::Ollama => Self::api("http://localhost:11434"),
        }
    }

    fn api(base_url: &str) -> Self {
        Self {
            base_url: base_url.into(),
            origin: None,
            referer: None,
            user_agent: API_USER_AGENT.into(),
            language: "en".into(),
            extra_headers: BTreeMap::new(),
            fallback_build_label: None,
        }
    }

    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn apply(&mut self, patch: ProfilePatch) {
        if let Some(v) = patch.base_url {
            self.base_url = v;
        }
        if let Some(v) = patch.origin {
            self.origin = Some(v);
        }
        if let Some(v) = patch.referer {
            self.referer = Some(v);
        }
        if let Some(v) = patch.user_agent {
            self.user_agent = v;
        }
        if let Some(v) = patch.language {
            self.language = v;
        }
        if let Some(v) = patch.fallback_build_label {
            self.fallback_build_label = Some(v);
        }
        self.extra_headers.extend(patch.extra_headers);
    }
}

/// Partial profile as written in a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProfilePatch {
    base_url: Option<String>,
    origin: Option<String>,
    referer: Option<String>,
    user_agent: Option<String>,
    language: Option<String>,
    fallback_build_label: Option<String>,
    extra_headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    models_file: Option<PathBuf>,
    profiles: BTreeMap<String, ProfilePatch>,
}

/// Layered configuration for all adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    profiles: BTreeMap<ProviderKey, ProviderProfile>,
    /// Optional TOML model catalog overriding the built-in model lists.
    pub models_file: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            profiles: ProviderKey::iter()
                .map(|key| (key, ProviderProfile::builtin(key)))
                .collect(),
            models_file: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self, key: ProviderKey) -> ProviderProfile {
        self.profiles
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ProviderProfile::builtin(key))
    }

    pub fn set_profile(&mut self, key: ProviderKey, profile: ProviderProfile) {
        self.profiles.insert(key, profile);
    }

    pub fn set_base_url(&mut self, key: ProviderKey, url: impl Into<String>) {
        let mut profile = self.profile(key);
        profile.base_url = url.into();
        self.profiles.insert(key, profile);
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        let mut config = Self::default();
        config.apply_toml_str(text)?;
        Ok(config)
    }

    /// Overlay a TOML document of `[profiles.<provider>]` tables.
    pub fn apply_toml_str(&mut self, text: &str) -> Result<(), BridgeError> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| BridgeError::Configuration(format!("Invalid config file: {e}")))?;
        for (name, patch) in file.profiles {
            let key = ProviderKey::parse(&name).ok_or_else(|| {
                BridgeError::Configuration(format!("Unknown provider in config: '{name}'"))
            })?;
            let mut profile = self.profile(key);
            profile.apply(patch);
            self.profiles.insert(key, profile);
        }
        if file.models_file.is_some() {
            self.models_file = file.models_file;
        }
        Ok(())
    }

    /// Defaults overlaid with a config file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Default config file path (~/.webchat-bridge/config.toml).
    pub fn default_config_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".webchat-bridge"))
            .unwrap_or_else(|| PathBuf::from(".webchat-bridge"))
            .join("config.toml")
    }

    /// Load defaults, then the config file, then environment overrides.
    ///
    /// `WEBCHAT_CONFIG` names the config file; otherwise the default path is
    /// used when it exists. A broken config file is logged and skipped.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();

        let path = std::env::var("WEBCHAT_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(|| Some(Self::default_config_path()).filter(|p| p.exists()));
        if let Some(path) = path {
            match std::fs::read_to_string(&path)
                .map_err(BridgeError::from)
                .and_then(|text| config.apply_toml_str(&text))
            {
                Ok(()) => debug!(path = %path.display(), "Loaded config file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        for key in ProviderKey::iter() {
            if let Ok(url) = std::env::var(key.base_url_env()) {
                config.set_base_url(key, url);
            }
        }
        if let Ok(agent) = std::env::var("WEBCHAT_USER_AGENT") {
            for profile in config.profiles.values_mut() {
                if profile.origin.is_some() {
                    profile.user_agent = agent.clone();
                }
            }
        }
        if let Ok(path) = std::env::var("WEBCHAT_MODELS_FILE") {
            config.models_file = Some(PathBuf::from(path));
        }

        config
    }
}
