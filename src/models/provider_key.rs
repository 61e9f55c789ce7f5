//! Typed provider identifiers and alias handling.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Canonical provider keys used across config, catalogs, and adapter wiring.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProviderKey {
    GeminiWeb,
    QwenWeb,
    #[serde(rename = "openai-compatible")]
    #[strum(serialize = "openai-compatible")]
    OpenAiCompatible,
    Ollama,
}

impl ProviderKey {
    /// Canonical provider key string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeminiWeb => "gemini-web",
            Self::QwenWeb => "qwen-web",
            Self::OpenAiCompatible => "openai-compatible",
            Self::Ollama => "ollama",
        }
    }

    /// Parse user-facing provider aliases into a typed provider key.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini-web" | "gemini_web" | "gemini" | "bard" => Some(Self::GeminiWeb),
            "qwen-web" | "qwen_web" | "qwen" => Some(Self::QwenWeb),
            "openai-compatible" | "openai_compatible" | "openai" => {
                Some(Self::OpenAiCompatible)
            }
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Environment variable overriding this provider's base URL.
    pub const fn base_url_env(self) -> &'static str {
        match self {
            Self::GeminiWeb => "GEMINI_WEB_BASE_URL",
            Self::QwenWeb => "QWEN_WEB_BASE_URL",
            Self::OpenAiCompatible => "OPENAI_COMPAT_BASE_URL",
            Self::Ollama => "OLLAMA_BASE_URL",
        }
    }
}
