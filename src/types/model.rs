//! Model descriptors returned by `get_models`.

use serde::{Deserialize, Serialize};

/// Id of the synthetic entry appended when a live model listing fails.
pub const DIAGNOSTIC_MODEL_ID: &str = "debug-error";

/// A model as presented to the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy: Option<bool>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_thinking: false,
            context_length: None,
            legacy: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn thinking(mut self) -> Self {
        self.is_thinking = true;
        self
    }

    pub fn with_context_length(mut self, context_length: u64) -> Self {
        self.context_length = Some(context_length);
        self
    }

    /// Synthetic entry describing why the live listing failed.
    pub fn diagnostic(reason: impl Into<String>) -> Self {
        Self::new(DIAGNOSTIC_MODEL_ID, "Model list unavailable (showing defaults)")
            .with_description(reason)
    }

    pub fn is_diagnostic(&self) -> bool {
        self.id == DIAGNOSTIC_MODEL_ID
    }
}
