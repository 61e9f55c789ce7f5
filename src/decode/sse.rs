//! Server-sent-events framing (`data: {...}` lines, `data: [DONE]` end marker).
//!
//! Understands the OpenAI `choices[0].delta` shape plus the variants used by
//! web chat backends: a `phase` marker separating thinking from answer text,
//! top-level `content`/`thinking` fields, and a `response.created` envelope
//! announcing the conversation id. An error object in the stream, or a bare
//! `{"success": false}` envelope answered in place of an event stream, ends
//! the stream with a provider error.

use std::ops::ControlFlow;

use serde_json::Value;
use tracing::{trace, warn};

use super::{embedded_error, LineDecoder};
use crate::error::BridgeError;
use crate::models::ProviderKey;
use crate::types::{ConversationMetadata, StreamEvent};

const DONE_MARKER: &str = "[DONE]";
const THINKING_PHASES: &[&str] = &["think", "thinking", "thinking_summary"];

#[derive(Debug)]
pub struct SseDecoder {
    provider: ProviderKey,
    conversation_id: Option<String>,
    total_tokens: Option<u64>,
}

impl SseDecoder {
    pub fn new(provider: ProviderKey) -> Self {
        Self {
            provider,
            conversation_id: None,
            total_tokens: None,
        }
    }

    /// Treat `id` as already announced, so an echo of it is not re-emitted.
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Push a provider error when `value` carries one.
    fn reject(&self, value: &Value, events: &mut Vec<StreamEvent>) -> ControlFlow<()> {
        match embedded_error(value) {
            Some(message) => {
                warn!(provider = %self.provider, error = %message, "Provider error inside event stream");
                events.push(StreamEvent::Error(BridgeError::provider(
                    self.provider.as_str(),
                    message,
                )));
                ControlFlow::Break(())
            }
            None => ControlFlow::Continue(()),
        }
    }

    fn probe(&mut self, value: &Value, events: &mut Vec<StreamEvent>) {
        if let Some(chat_id) = value
            .get("response.created")
            .and_then(|created| created.get("chat_id"))
            .and_then(Value::as_str)
        {
            if self.conversation_id.as_deref() != Some(chat_id) {
                self.conversation_id = Some(chat_id.to_string());
                events.push(StreamEvent::Metadata(ConversationMetadata::conversation(
                    chat_id,
                )));
            }
        }

        if let Some(delta) = value.pointer("/choices/0/delta") {
            push_delta(delta, events);
        }
        if let Some(thinking) = non_empty_str(value.get("thinking")) {
            events.push(StreamEvent::ThinkingDelta(thinking.to_string()));
        }
        if let Some(content) = non_empty_str(value.get("content")) {
            events.push(StreamEvent::ContentDelta(content.to_string()));
        }

        let title = non_empty_str(value.get("title")).map(str::to_string);
        let tokens = value
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .filter(|t| self.total_tokens != Some(*t));
        if title.is_some() || tokens.is_some() {
            if tokens.is_some() {
                self.total_tokens = tokens;
            }
            events.push(StreamEvent::Metadata(ConversationMetadata {
                conversation_id: None,
                conversation_title: title,
                total_token: tokens,
            }));
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn push_delta(delta: &Value, events: &mut Vec<StreamEvent>) {
    for key in ["reasoning_content", "reasoning"] {
        if let Some(reasoning) = non_empty_str(delta.get(key)) {
            events.push(StreamEvent::ThinkingDelta(reasoning.to_string()));
        }
    }
    let Some(content) = non_empty_str(delta.get("content")) else {
        return;
    };
    let thinking = delta
        .get("phase")
        .and_then(Value::as_str)
        .is_some_and(|phase| THINKING_PHASES.contains(&phase));
    if thinking {
        events.push(StreamEvent::ThinkingDelta(content.to_string()));
    } else {
        events.push(StreamEvent::ContentDelta(content.to_string()));
    }
}

impl LineDecoder for SseDecoder {
    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> ControlFlow<()> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            // Some backends answer with a plain JSON envelope instead of
            // events; only its error shape is meaningful.
            if line.starts_with('{') {
                if let Ok(value) = serde_json::from_str::<Value>(line) {
                    return self.reject(&value, events);
                }
            }
            return ControlFlow::Continue(());
        };
        let data = data.trim();
        if data == DONE_MARKER {
            return ControlFlow::Break(());
        }
        match serde_json::from_str::<Value>(data) {
            Ok(value) => {
                if self.reject(&value, events).is_break() {
                    return ControlFlow::Break(());
                }
                self.probe(&value, events);
            }
            Err(_) => trace!(len = data.len(), "Skipping unparseable SSE data line"),
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(lines: &[&str]) -> (Vec<StreamEvent>, bool) {
        let mut decoder = SseDecoder::new(ProviderKey::QwenWeb);
        let mut events = Vec::new();
        for line in lines {
            if decoder.decode_line(line, &mut events).is_break() {
                return (events, true);
            }
        }
        (events, false)
    }

    #[test]
    fn openai_delta_and_done_marker() {
        let (events, done) = decode(&[
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"late"}}]}"#,
        ]);
        assert!(done);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::ContentDelta(t) if t == "Hi"));
    }

    #[test]
    fn think_phase_becomes_thinking() {
        let (events, _) = decode(&[
            r#"data: {"choices":[{"delta":{"content":"hmm","phase":"think"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"answer","phase":"answer"}}]}"#,
        ]);
        assert!(matches!(&events[0], StreamEvent::ThinkingDelta(t) if t == "hmm"));
        assert!(matches!(&events[1], StreamEvent::ContentDelta(t) if t == "answer"));
    }

    #[test]
    fn response_created_announces_conversation() {
        let (events, _) = decode(&[
            r#"data: {"response.created":{"chat_id":"chat-1","response_id":"r"}}"#,
        ]);
        assert!(matches!(
            &events[0],
            StreamEvent::Metadata(m) if m.conversation_id.as_deref() == Some("chat-1")
        ));
    }

    #[test]
    fn usage_is_reported_only_when_it_changes() {
        let (events, _) = decode(&[
            r#"data: {"choices":[],"usage":{"total_tokens":5}}"#,
            r#"data: {"choices":[],"usage":{"total_tokens":5}}"#,
            r#"data: {"choices":[],"usage":{"total_tokens":9}}"#,
        ]);
        let totals: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Metadata(m) => m.total_token,
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![5, 9]);
    }

    #[test]
    fn top_level_fields_and_reasoning_content() {
        let (events, _) = decode(&[
            r#"data: {"thinking":"t1","content":"c1"}"#,
            r#"data: {"choices":[{"delta":{"reasoning_content":"r1"}}]}"#,
        ]);
        assert!(matches!(&events[0], StreamEvent::ThinkingDelta(t) if t == "t1"));
        assert!(matches!(&events[1], StreamEvent::ContentDelta(t) if t == "c1"));
        assert!(matches!(&events[2], StreamEvent::ThinkingDelta(t) if t == "r1"));
    }

    #[test]
    fn error_object_ends_stream_with_provider_error() {
        let (events, done) = decode(&[
            r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#,
            r#"data: {"error":{"code":"Bad_Request","details":"The chat is in progress!"}}"#,
            r#"data: {"choices":[{"delta":{"content":"late"}}]}"#,
        ]);
        assert!(done);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Error(BridgeError::Provider { provider, message })
                if provider == "qwen-web" && message == "The chat is in progress!"
        ));
    }

    #[test]
    fn bare_rejection_envelope_is_an_error() {
        let (events, done) = decode(&[
            r#"{"success":false,"data":{"code":"RateLimited","details":"too many requests"}}"#,
        ]);
        assert!(done);
        assert!(matches!(
            &events[0],
            StreamEvent::Error(BridgeError::Provider { message, .. }) if message == "too many requests"
        ));
    }

    #[test]
    fn null_error_member_is_not_an_error() {
        let (events, _) = decode(&[r#"data: {"error":null,"choices":[{"delta":{"content":"ok"}}]}"#]);
        assert!(matches!(&events[0], StreamEvent::ContentDelta(t) if t == "ok"));
    }

    #[test]
    fn non_data_and_garbage_lines_are_skipped() {
        let (events, done) = decode(&[": keep-alive", "event: ping", "data: {oops", "data:"]);
        assert!(events.is_empty());
        assert!(!done);
    }
}
