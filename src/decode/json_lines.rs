//! Newline-delimited JSON framing (one object per line, no `data:` prefix).
//!
//! Probes the Ollama chat shape (`message.content`, `message.thinking`,
//! `done`) and the generate shape (`response`), plus bare top-level
//! `content`/`thinking` fields. An `{"error": ...}` line ends the stream with
//! a provider error.

use std::ops::ControlFlow;

use serde_json::Value;
use tracing::{trace, warn};

use super::{embedded_error, LineDecoder};
use crate::error::BridgeError;
use crate::models::ProviderKey;
use crate::types::{ConversationMetadata, StreamEvent};

#[derive(Debug)]
pub struct JsonLinesDecoder {
    provider: ProviderKey,
}

impl JsonLinesDecoder {
    pub fn new(provider: ProviderKey) -> Self {
        Self { provider }
    }
}

fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

impl LineDecoder for JsonLinesDecoder {
    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> ControlFlow<()> {
        let line = line.trim();
        if line.is_empty() {
            return ControlFlow::Continue(());
        }
        let value = match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                trace!(len = line.len(), "Skipping non-object JSON line");
                return ControlFlow::Continue(());
            }
        };

        if let Some(message) = embedded_error(&value) {
            warn!(provider = %self.provider, error = %message, "Error object inside JSON-lines stream");
            events.push(StreamEvent::Error(BridgeError::provider(
                self.provider.as_str(),
                message,
            )));
            return ControlFlow::Break(());
        }

        for pointer in ["/message/thinking", "/thinking"] {
            if let Some(thinking) = text_at(&value, pointer) {
                events.push(StreamEvent::ThinkingDelta(thinking.to_string()));
            }
        }
        for pointer in ["/message/content", "/response", "/content"] {
            if let Some(content) = text_at(&value, pointer) {
                events.push(StreamEvent::ContentDelta(content.to_string()));
            }
        }

        if value.get("done").and_then(Value::as_bool) == Some(true) {
            let prompt = value.get("prompt_eval_count").and_then(Value::as_u64);
            let completion = value.get("eval_count").and_then(Value::as_u64);
            if prompt.is_some() || completion.is_some() {
                let total = prompt.unwrap_or(0) + completion.unwrap_or(0);
                events.push(StreamEvent::Metadata(ConversationMetadata::tokens(total)));
            }
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
