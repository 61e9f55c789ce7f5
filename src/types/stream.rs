//! Streaming event types.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Conversation-level facts discovered while decoding a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token: Option<u64>,
}

impl ConversationMetadata {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn tokens(total: u64) -> Self {
        Self {
            total_token: Some(total),
            ..Default::default()
        }
    }
}

/// A decoded event emitted while a response streams in.
///
/// A stream yields any number of deltas and metadata, then exactly one
/// `Done` or `Error`.
#[derive(Debug)]
pub enum StreamEvent {
    ContentDelta(String),
    ThinkingDelta(String),
    Metadata(ConversationMetadata),
    Done,
    Error(BridgeError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
