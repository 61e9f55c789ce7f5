//! StreamGenerate request payload.
//!
//! The backend takes a 69-slot positional array. Each slot with a known
//! meaning has a named field here; the index mapping lives only in [`slot`]
//! and in [`StreamGeneratePayload::to_inner`].

use chrono::{Local, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::decode::batchexecute::CONVERSATION_ID_SEPARATOR;

/// Slot indices of the inner array.
pub mod slot {
    pub const MESSAGE: usize = 0;
    pub const LANGUAGE: usize = 1;
    pub const SESSION: usize = 2;
    pub const CONTINUATION: usize = 3;
    pub const TRACE_ID: usize = 4;
    pub const MODEL_SELECTOR: usize = 49;
    pub const CLIENT_UUID: usize = 59;
    pub const TIMESTAMP: usize = 66;
    pub const LEN: usize = 69;
}

/// Slots the web client always sends with fixed values.
fn constant_slots() -> [(usize, Value); 11] {
    [
        (6, json!([1])),
        (7, json!(1)),
        (10, json!(1)),
        (11, json!(0)),
        (17, json!([[0]])),
        (18, json!(0)),
        (27, json!(1)),
        (30, json!([4])),
        (53, json!(0)),
        (61, json!([])),
        (68, json!(2)),
    ]
}

/// Numeric model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast = 3,
    Advanced = 4,
}

impl ModelTier {
    /// Map a logical model id; unknown ids use the fast tier.
    pub fn for_model(model: Option<&str>) -> Self {
        let Some(model) = model else {
            return Self::Fast;
        };
        let model = model.to_ascii_lowercase();
        if ["pro", "advanced", "thinking"]
            .iter()
            .any(|tier| model.contains(tier))
        {
            Self::Advanced
        } else {
            Self::Fast
        }
    }
}

/// `[conversation id, response id, candidate id]` of an ongoing chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTriple {
    pub conversation_id: String,
    pub response_id: String,
    pub candidate_id: Option<String>,
}

impl SessionTriple {
    /// Split a composite id (`cid|rid|rcid`). Missing parts stay empty.
    pub fn parse(composite: &str) -> Self {
        let mut parts = composite.split(CONVERSATION_ID_SEPARATOR).map(str::trim);
        Self {
            conversation_id: parts.next().unwrap_or_default().to_string(),
            response_id: parts.next().unwrap_or_default().to_string(),
            candidate_id: parts.next().filter(|p| !p.is_empty()).map(str::to_string),
        }
    }

    pub fn composite(&self) -> String {
        let mut parts = vec![self.conversation_id.as_str(), self.response_id.as_str()];
        if let Some(candidate) = &self.candidate_id {
            parts.push(candidate);
        }
        parts.join(CONVERSATION_ID_SEPARATOR)
    }

    pub fn is_new(&self) -> bool {
        self.conversation_id.is_empty()
    }

    fn to_value(&self) -> Value {
        if self.is_new() {
            return json!(["", "", ""]);
        }
        json!([self.conversation_id, self.response_id, self.candidate_id])
    }
}

/// One outbound turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamGeneratePayload {
    pub prompt: String,
    pub language: String,
    pub session: SessionTriple,
    pub continuation_token: Option<String>,
    pub trace_id: String,
    pub tier: ModelTier,
    pub client_uuid: String,
    pub timestamp: i64,
    pub tz_offset_secs: i32,
}

impl StreamGeneratePayload {
    /// New payload with fresh trace id, client UUID and timestamp.
    pub fn new(prompt: impl Into<String>, language: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            prompt: prompt.into(),
            language: language.into(),
            session: SessionTriple::default(),
            continuation_token: None,
            trace_id: Uuid::new_v4().simple().to_string(),
            tier,
            client_uuid: Uuid::new_v4().to_string().to_uppercase(),
            timestamp: Utc::now().timestamp(),
            tz_offset_secs: Local::now().offset().local_minus_utc(),
        }
    }

    pub fn with_conversation(mut self, composite: Option<&str>) -> Self {
        self.session = composite.map(SessionTriple::parse).unwrap_or_default();
        self
    }

    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    /// The positional inner array.
    pub fn to_inner(&self) -> Vec<Value> {
        let mut inner = vec![Value::Null; slot::LEN];
        inner[slot::MESSAGE] = json!([self.prompt, 0, null, null, null, null, 0]);
        inner[slot::LANGUAGE] = json!([self.language]);
        inner[slot::SESSION] = self.session.to_value();
        inner[slot::CONTINUATION] = json!(self.continuation_token);
        inner[slot::TRACE_ID] = json!(self.trace_id);
        inner[slot::MODEL_SELECTOR] = Value::from(self.tier as u8);
        inner[slot::CLIENT_UUID] = json!(self.client_uuid);
        inner[slot::TIMESTAMP] = json!([self.timestamp, self.tz_offset_secs]);
        for (index, value) in constant_slots() {
            inner[index] = value;
        }
        inner
    }

    /// `f.req` form value: `[null, "<inner array as JSON>"]`.
    pub fn f_req(&self) -> String {
        let inner = Value::Array(self.to_inner()).to_string();
        json!([null, inner]).to_string()
    }

    /// Form fields of the StreamGenerate POST.
    pub fn form_fields(&self, at_token: Option<&str>) -> Vec<(String, String)> {
        let mut fields = vec![("f.req".to_string(), self.f_req())];
        if let Some(at) = at_token {
            fields.push(("at".to_string(), at.to_string()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_array_has_fixed_length_and_named_slots() {
        let payload = StreamGeneratePayload::new("hello", "en", ModelTier::Fast);
        let inner = payload.to_inner();
        assert_eq!(inner.len(), slot::LEN);
        assert_eq!(inner[slot::MESSAGE][0], "hello");
        assert_eq!(inner[slot::LANGUAGE], json!(["en"]));
        assert_eq!(inner[slot::SESSION], json!(["", "", ""]));
        assert_eq!(inner[slot::CONTINUATION], Value::Null);
        assert_eq!(inner[slot::MODEL_SELECTOR], json!(3));
        assert_eq!(inner[68], json!(2));
    }

    #[test]
    fn random_fields_are_well_shaped() {
        let a = StreamGeneratePayload::new("x", "en", ModelTier::Fast);
        let b = StreamGeneratePayload::new("x", "en", ModelTier::Fast);
        assert_eq!(a.trace_id.len(), 32);
        assert!(a.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.trace_id, b.trace_id);
        assert!(Uuid::parse_str(&a.client_uuid).is_ok());
        assert_eq!(a.client_uuid, a.client_uuid.to_uppercase());
        let stamp = &a.to_inner()[slot::TIMESTAMP];
        assert!(stamp[0].as_i64().unwrap() > 1_600_000_000);
        assert!(stamp[1].is_i64());
    }

    #[test]
    fn composite_id_reproduces_session_array() {
        let triple = SessionTriple {
            conversation_id: "c_1".into(),
            response_id: "r_2".into(),
            candidate_id: Some("rc_3".into()),
        };
        let composite = triple.composite();
        assert_eq!(composite, "c_1|r_2|rc_3");
        let payload =
            StreamGeneratePayload::new("x", "en", ModelTier::Fast).with_conversation(Some(&composite));
        assert_eq!(payload.session, triple);
        assert_eq!(payload.to_inner()[slot::SESSION], json!(["c_1", "r_2", "rc_3"]));
    }

    #[test]
    fn two_part_id_leaves_candidate_null() {
        let session = SessionTriple::parse("c_1|r_2");
        assert_eq!(session.to_value(), json!(["c_1", "r_2", null]));
    }

    #[test]
    fn tier_mapping() {
        assert_eq!(ModelTier::for_model(None), ModelTier::Fast);
        assert_eq!(ModelTier::for_model(Some("gemini-web-fast")), ModelTier::Fast);
        assert_eq!(ModelTier::for_model(Some("whatever")), ModelTier::Fast);
        assert_eq!(ModelTier::for_model(Some("gemini-web-pro")), ModelTier::Advanced);
        assert_eq!(ModelTier::for_model(Some("gemini-web-thinking")), ModelTier::Advanced);
    }

    #[test]
    fn f_req_wraps_inner_json_as_string() {
        let payload = StreamGeneratePayload::new("hi", "en", ModelTier::Advanced)
            .with_continuation(Some("!tok".into()));
        let outer: Value = serde_json::from_str(&payload.f_req()).unwrap();
        assert_eq!(outer[0], Value::Null);
        let inner: Value = serde_json::from_str(outer[1].as_str().unwrap()).unwrap();
        assert_eq!(inner[slot::CONTINUATION], "!tok");
        assert_eq!(inner[slot::MODEL_SELECTOR], 4);
        let fields = payload.form_fields(Some("at-1"));
        assert_eq!(fields[1], ("at".to_string(), "at-1".to_string()));
    }
}
