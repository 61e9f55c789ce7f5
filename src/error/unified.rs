//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Credential,
    Authentication,
    Context,
    RateLimit,
    Network,
    Server,
    Api,
    Configuration,
    Serialization,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Paste a fresh cookie/token blob.
    RefreshCredential,
    RetryWithBackoff,
    CheckConfiguration,
    ContactSupport,
}
