//! Error types for the adapter layer.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for every adapter operation.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Context extraction failed: {0}")]
    ContextExtraction(String),

    #[error("Upstream HTTP error (status {status}): {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Stream error: {0}")]
    Stream(String),
}

impl BridgeError {
    /// Create an upstream HTTP error, keeping the raw body for diagnostics.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::UpstreamHttp {
            status,
            body: body.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingCredential(_) => ErrorCategory::Credential,
            Self::ContextExtraction(_) => ErrorCategory::Context,
            Self::Network(_) | Self::Stream(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Configuration(_) | Self::Io(_) | Self::ModelNotFound(_) => {
                ErrorCategory::Configuration
            }
            Self::UpstreamHttp { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Provider { .. } | Self::InvalidRequest(_) => ErrorCategory::Api,
        }
    }

    /// Whether a calling collaborator could reasonably retry this error.
    ///
    /// The adapters themselves never retry on this basis.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }

    /// Whether the failure signals that the cached provider context went stale.
    pub fn is_stale_context(&self) -> bool {
        matches!(self, Self::UpstreamHttp { status: 400 | 401 | 403, .. })
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Credential
            | ErrorCategory::Authentication
            | ErrorCategory::Context => RecoverySuggestion::RefreshCredential,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BridgeError>;
