//! Google batchexecute-style framing.
//!
//! Relevant lines are JSON arrays of envelopes:
//! `[["wrb.fr", <rpc id>, "<inner JSON>", ...], ...]`. The third element is a
//! JSON document encoded as a string and must be parsed a second time. The
//! inner document carries *cumulative* text, so only the new suffix is
//! emitted on each frame.
//!
//! An `["e", ..., code]` entry closes every response. Arriving before any
//! text it means the request was rejected, and the stream ends with a
//! provider error carrying the code.

use std::ops::ControlFlow;

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::LineDecoder;
use crate::error::BridgeError;
use crate::models::ProviderKey;
use crate::types::{ConversationMetadata, StreamEvent};

const ENVELOPE_TAG: &str = "wrb.fr";
const ERROR_TAG: &str = "e";
const CONTINUATION_SENTINEL: char = '!';
/// Separator of the composite conversation id (`cid|rid|rcid`).
pub const CONVERSATION_ID_SEPARATOR: &str = "|";

/// Receives rotated continuation tokens as they are discovered.
pub type ContinuationSink = Box<dyn FnMut(String) + Send>;

pub struct BatchExecuteDecoder {
    /// Expected second envelope element; `None` expects a JSON null.
    rpc_id: Option<String>,
    emitted_text: String,
    emitted_thinking: String,
    conversation_id: Option<String>,
    continuation: Option<String>,
    on_continuation: Option<ContinuationSink>,
}

impl BatchExecuteDecoder {
    pub fn new(rpc_id: Option<String>) -> Self {
        Self {
            rpc_id,
            emitted_text: String::new(),
            emitted_thinking: String::new(),
            conversation_id: None,
            continuation: None,
            on_continuation: None,
        }
    }

    pub fn with_continuation_sink(mut self, sink: ContinuationSink) -> Self {
        self.on_continuation = Some(sink);
        self
    }

    fn rpc_matches(&self, value: Option<&Value>) -> bool {
        match (&self.rpc_id, value) {
            (Some(expected), Some(Value::String(actual))) => expected == actual,
            (None, None | Some(Value::Null)) => true,
            _ => false,
        }
    }

    fn has_emitted(&self) -> bool {
        !self.emitted_text.is_empty() || !self.emitted_thinking.is_empty()
    }

    fn decode_payload(&mut self, inner: &Value, events: &mut Vec<StreamEvent>) {
        if let Some(token) = continuation_token(inner) {
            if self.continuation.as_deref() != Some(token) {
                self.continuation = Some(token.to_string());
                if let Some(sink) = self.on_continuation.as_mut() {
                    sink(token.to_string());
                }
            }
        }

        if let Some(id) = conversation_id(inner) {
            if self.conversation_id.as_deref() != Some(id.as_str()) {
                self.conversation_id = Some(id.clone());
                events.push(StreamEvent::Metadata(ConversationMetadata::conversation(id)));
            }
        }

        if let Some(thinking) = thinking_text(inner) {
            if let Some(delta) = cumulative_delta(&mut self.emitted_thinking, thinking) {
                events.push(StreamEvent::ThinkingDelta(delta));
            }
        }

        // Which shape applies depends on the backend version; neither is
        // authoritative. Current Gemini builds only fill the fallback.
        if let Some(text) = primary_text(inner).or_else(|| fallback_text(inner)) {
            if let Some(delta) = cumulative_delta(&mut self.emitted_text, text) {
                events.push(StreamEvent::ContentDelta(delta));
            }
        }
    }
}

impl LineDecoder for BatchExecuteDecoder {
    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> ControlFlow<()> {
        let line = line.trim();
        if !line.starts_with("[[") {
            return ControlFlow::Continue(());
        }
        let entries = match serde_json::from_str::<Value>(line) {
            Ok(Value::Array(entries)) => entries,
            _ => {
                trace!(len = line.len(), "Skipping unparseable batchexecute line");
                return ControlFlow::Continue(());
            }
        };

        for entry in &entries {
            let Some(parts) = entry.as_array() else {
                continue;
            };
            match parts.first().and_then(Value::as_str) {
                Some(ENVELOPE_TAG) => {}
                Some(ERROR_TAG) => {
                    let code = parts.iter().rev().find_map(Value::as_i64);
                    if self.has_emitted() {
                        debug!(code = ?code, "Protocol trailer frame");
                        continue;
                    }
                    warn!(code = ?code, "Provider rejected the request");
                    let message = match code {
                        Some(code) => format!("protocol error frame (code {code})"),
                        None => "protocol error frame".to_string(),
                    };
                    events.push(StreamEvent::Error(BridgeError::provider(
                        ProviderKey::GeminiWeb.as_str(),
                        message,
                    )));
                    return ControlFlow::Break(());
                }
                _ => continue,
            }
            if !self.rpc_matches(parts.get(1)) {
                continue;
            }
            let Some(payload) = parts.get(2).and_then(Value::as_str) else {
                continue;
            };
            match serde_json::from_str::<Value>(payload) {
                Ok(inner) => self.decode_payload(&inner, events),
                Err(_) => trace!("Skipping unparseable inner payload"),
            }
        }
        ControlFlow::Continue(())
    }
}

fn at<'a>(value: &'a Value, path: &[usize]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, idx| node.get(*idx))
}

/// Plain text shape: `inner[0][0][0]`.
pub fn primary_text(inner: &Value) -> Option<&str> {
    at(inner, &[0, 0, 0])?.as_str()
}

/// Candidate shape of StreamGenerate replies: `inner[4][0][1][0]`.
pub fn fallback_text(inner: &Value) -> Option<&str> {
    at(inner, &[4, 0, 1, 0])?.as_str()
}

/// Thought summary of thinking models: `inner[4][0][37][0][0]`.
pub fn thinking_text(inner: &Value) -> Option<&str> {
    at(inner, &[4, 0, 37, 0, 0])?.as_str()
}

/// Rotated continuation token: a string at `inner[3]` starting with `!`.
pub fn continuation_token(inner: &Value) -> Option<&str> {
    inner
        .get(3)?
        .as_str()
        .filter(|s| s.starts_with(CONTINUATION_SENTINEL))
}

/// Composite id from `inner[1]` (`[cid, rid]`) and the candidate id at
/// `inner[4][0][0]`, joined with `|`.
pub fn conversation_id(inner: &Value) -> Option<String> {
    let mut parts: Vec<&str> = inner
        .get(1)?
        .as_array()?
        .iter()
        .map_while(Value::as_str)
        .collect();
    if parts.is_empty() {
        return None;
    }
    if let Some(candidate) = at(inner, &[4, 0, 0]).and_then(Value::as_str) {
        parts.push(candidate);
    }
    Some(parts.join(CONVERSATION_ID_SEPARATOR))
}

/// New suffix of cumulative text, updating what has been emitted so far.
///
/// A frame that rewrites already emitted text cannot be expressed as a
/// delta; the decoder resyncs to it and emits nothing for that frame.
fn cumulative_delta(emitted: &mut String, current: &str) -> Option<String> {
    if emitted.starts_with(current) {
        return None;
    }
    let Some(suffix) = current.strip_prefix(emitted.as_str()) else {
        debug!(
            emitted = emitted.len(),
            current = current.len(),
            "Cumulative text was revised, resyncing"
        );
        *emitted = current.to_string();
        return None;
    };
    let delta = suffix.to_string();
    *emitted = current.to_string();
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn frame(rpc: Value, inner: Value) -> String {
        json!([["wrb.fr", rpc, inner.to_string()]]).to_string()
    }

    fn decode(decoder: &mut BatchExecuteDecoder, line: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let _ = decoder.decode_line(line, &mut events);
        events
    }

    fn texts(events: &[StreamEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn primary_path_resolves_simple_shape() {
        let mut decoder = BatchExecuteDecoder::new(Some("TAG".into()));
        let events = decode(&mut decoder, r#"[["wrb.fr","TAG","[[[\"hello world\"]]]"]]"#);
        assert_eq!(texts(&events), vec!["hello world"]);
    }

    #[test]
    fn cumulative_frames_emit_suffixes() {
        let mut decoder = BatchExecuteDecoder::new(None);
        let first = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["Hel"]]]]));
        let second = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["Hello"]]]]));
        assert_eq!(texts(&decode(&mut decoder, &first)), vec!["Hel"]);
        assert_eq!(texts(&decode(&mut decoder, &second)), vec!["lo"]);
        assert!(texts(&decode(&mut decoder, &second)).is_empty());
    }

    #[test]
    fn other_rpc_ids_are_ignored() {
        let mut decoder = BatchExecuteDecoder::new(Some("TAG".into()));
        let line = frame(json!("OTHER"), json!([[["nope"]]]));
        assert!(decode(&mut decoder, &line).is_empty());
    }

    #[test]
    fn conversation_id_is_composed_once() {
        let mut decoder = BatchExecuteDecoder::new(None);
        let inner = json!([null, ["c_1", "r_2"], null, null, [["rc_3", ["hi"]]]]);
        let events = decode(&mut decoder, &frame(Value::Null, inner.clone()));
        assert!(matches!(
            &events[0],
            StreamEvent::Metadata(m) if m.conversation_id.as_deref() == Some("c_1|r_2|rc_3")
        ));
        let again = decode(&mut decoder, &frame(Value::Null, inner));
        assert!(again.iter().all(|e| !matches!(e, StreamEvent::Metadata(_))));
    }

    #[test]
    fn continuation_token_reaches_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let mut decoder = BatchExecuteDecoder::new(None).with_continuation_sink(Box::new(
            move |token| sink_seen.lock().unwrap().push(token),
        ));
        let inner = json!([null, null, null, "!rotated-token", null]);
        decode(&mut decoder, &frame(Value::Null, inner));
        let plain = json!([null, null, null, "not-a-token", null]);
        decode(&mut decoder, &frame(Value::Null, plain));
        assert_eq!(*seen.lock().unwrap(), vec!["!rotated-token".to_string()]);
    }

    #[test]
    fn thinking_path_emits_thinking_delta() {
        let mut candidate = vec![Value::Null; 38];
        candidate[0] = json!("rc_1");
        candidate[37] = json!([["Considering"]]);
        let inner = json!([null, null, null, null, [candidate]]);
        let mut decoder = BatchExecuteDecoder::new(None);
        let events = decode(&mut decoder, &frame(Value::Null, inner));
        assert!(matches!(&events[0], StreamEvent::ThinkingDelta(t) if t == "Considering"));
    }

    #[test]
    fn candidate_shape_is_the_fallback() {
        let inner = json!([null, null, null, null, [["rc_1", ["from candidate"]]]]);
        assert_eq!(primary_text(&inner), None);
        assert_eq!(fallback_text(&inner), Some("from candidate"));
        let both = json!([[["plain"]], null, null, null, [["rc_1", ["candidate"]]]]);
        let mut decoder = BatchExecuteDecoder::new(None);
        assert_eq!(texts(&decode(&mut decoder, &frame(Value::Null, both))), vec!["plain"]);
    }

    #[test]
    fn revised_text_resyncs_without_emitting() {
        let mut decoder = BatchExecuteDecoder::new(None);
        let draft = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["Hello wrld"]]]]));
        let revised = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["Hello world"]]]]));
        let extended = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["Hello world!"]]]]));
        assert_eq!(texts(&decode(&mut decoder, &draft)), vec!["Hello wrld"]);
        assert!(texts(&decode(&mut decoder, &revised)).is_empty());
        assert_eq!(texts(&decode(&mut decoder, &extended)), vec!["!"]);
    }

    #[test]
    fn error_frame_before_any_text_is_a_provider_error() {
        let mut decoder = BatchExecuteDecoder::new(None);
        let mut events = Vec::new();
        let flow = decoder.decode_line(r#"[["e",4,null,null,143]]"#, &mut events);
        assert!(flow.is_break());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error(BridgeError::Provider { provider, message })
                if provider == "gemini-web" && message.contains("143")
        ));
    }

    #[test]
    fn error_frame_after_text_is_a_trailer() {
        let mut decoder = BatchExecuteDecoder::new(None);
        let reply = frame(Value::Null, json!([null, null, null, null, [["rc_1", ["done"]]]]));
        assert_eq!(texts(&decode(&mut decoder, &reply)), vec!["done"]);
        let mut events = Vec::new();
        let flow = decoder.decode_line(r#"[["di",98],["e",4,null,null,812]]"#, &mut events);
        assert!(flow.is_continue());
        assert!(events.is_empty());
    }

    #[test]
    fn noise_lines_are_skipped() {
        let mut decoder = BatchExecuteDecoder::new(None);
        for line in [")]}'", "", "183", "[[garbage", r#"[["di",98]]"#] {
            assert!(decode(&mut decoder, line).is_empty());
        }
    }
}
