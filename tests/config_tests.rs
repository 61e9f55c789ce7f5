//! Tests for layered configuration and the model catalog file.

use std::io::Write;
use std::sync::{Mutex, OnceLock};

use pretty_assertions::assert_eq;
use webchat_bridge::config::{BridgeConfig, DESKTOP_USER_AGENT};
use webchat_bridge::error::BridgeError;
use webchat_bridge::models::{builtin_models, catalog_from_config, ProviderKey};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 7] = [
    "WEBCHAT_CONFIG",
    "WEBCHAT_USER_AGENT",
    "WEBCHAT_MODELS_FILE",
    "GEMINI_WEB_BASE_URL",
    "QWEN_WEB_BASE_URL",
    "OPENAI_COMPAT_BASE_URL",
    "OLLAMA_BASE_URL",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clear_env() -> EnvGuard {
    let guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    guard
}

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn set_base_url_keeps_other_profile_fields() {
    let mut config = BridgeConfig::new();
    config.set_base_url(ProviderKey::GeminiWeb, "http://localhost:8080");
    let gemini = config.profile(ProviderKey::GeminiWeb);
    assert_eq!(gemini.base_url, "http://localhost:8080");
    assert_eq!(gemini.user_agent, DESKTOP_USER_AGENT);
    assert_eq!(
        gemini.extra_headers.get("X-Same-Domain").map(String::as_str),
        Some("1")
    );
}

#[test]
fn env_overrides_base_urls_and_browser_user_agent() {
    let _lock = env_lock_guard();
    let _guard = clear_env();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("WEBCHAT_CONFIG", dir.path().join("absent.toml"));
    std::env::set_var("OLLAMA_BASE_URL", "http://gpu-box:11434");
    std::env::set_var("QWEN_WEB_BASE_URL", "http://127.0.0.1:9001");
    std::env::set_var("WEBCHAT_USER_AGENT", "TestBrowser/1.0");

    let config = BridgeConfig::from_env();
    assert_eq!(config.profile(ProviderKey::Ollama).base_url, "http://gpu-box:11434");
    assert_eq!(config.profile(ProviderKey::QwenWeb).base_url, "http://127.0.0.1:9001");
    assert_eq!(config.profile(ProviderKey::GeminiWeb).user_agent, "TestBrowser/1.0");
    assert_ne!(config.profile(ProviderKey::Ollama).user_agent, "TestBrowser/1.0");
}

#[test]
fn config_file_is_layered_under_env() {
    let _lock = env_lock_guard();
    let _guard = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "config.toml",
        r#"
        [profiles.gemini]
        base_url = "http://file-gemini"
        language = "de"

        [profiles.ollama]
        base_url = "http://file-ollama"
        "#,
    );
    std::env::set_var("WEBCHAT_CONFIG", &path);
    std::env::set_var("OLLAMA_BASE_URL", "http://env-ollama");

    let config = BridgeConfig::from_env();
    let gemini = config.profile(ProviderKey::GeminiWeb);
    assert_eq!(gemini.base_url, "http://file-gemini");
    assert_eq!(gemini.language, "de");
    assert_eq!(config.profile(ProviderKey::Ollama).base_url, "http://env-ollama");
}

#[test]
fn broken_config_file_is_skipped() {
    let _lock = env_lock_guard();
    let _guard = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "config.toml", "[profiles.gemini\nbase_url = ");
    std::env::set_var("WEBCHAT_CONFIG", &path);

    assert_eq!(BridgeConfig::from_env(), BridgeConfig::default());
}

#[test]
fn unknown_profile_field_is_configuration_error() {
    let err = BridgeConfig::from_toml_str("[profiles.qwen]\nbogus = 1").unwrap_err();
    assert!(matches!(err, BridgeError::Configuration(_)));
}

#[test]
fn models_file_from_env_feeds_catalog() {
    let _lock = env_lock_guard();
    let _guard = clear_env();
    let dir = tempfile::tempdir().unwrap();
    let models = write_file(
        &dir,
        "models.toml",
        r#"
        [[ollama]]
        id = "phi4:14b"
        name = "Phi-4"
        "#,
    );
    std::env::set_var("WEBCHAT_CONFIG", dir.path().join("absent.toml"));
    std::env::set_var("WEBCHAT_MODELS_FILE", &models);

    let config = BridgeConfig::from_env();
    assert_eq!(config.models_file.as_deref(), Some(models.as_path()));
    let catalog = catalog_from_config(&config);
    let ollama = catalog.load_static_models(ProviderKey::Ollama);
    assert_eq!(ollama.len(), 1);
    assert_eq!(ollama[0].id, "phi4:14b");
    assert_eq!(
        catalog.load_static_models(ProviderKey::GeminiWeb),
        builtin_models(ProviderKey::GeminiWeb)
    );
}

#[test]
fn unreadable_models_file_falls_back_to_builtin() {
    let mut config = BridgeConfig::new();
    config.models_file = Some("/definitely/not/here/models.toml".into());
    let catalog = catalog_from_config(&config);
    assert_eq!(
        catalog.load_static_models(ProviderKey::QwenWeb),
        builtin_models(ProviderKey::QwenWeb)
    );
}
