//! Qwen web chat adapter.
//!
//! Structured-JSON family: a conversation must exist before a completion can
//! be posted, so a turn without a conversation id first calls the
//! create-chat endpoint and streams into the returned chat id. Responses are
//! SSE with a `phase` marker separating thinking from answer text.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{BridgeConfig, ProviderProfile};
use crate::context::ContextSlot;
use crate::credential::Credential;
use crate::decode::{decode_body, decode_stream, embedded_error, EventStream, SseDecoder};
use crate::error::BridgeError;
use crate::models::{ModelCatalog, ProviderKey};
use crate::types::{ConversationMetadata, ModelDescriptor, StreamEvent};

use super::http::{HttpTransport, RawResponse, WireRequest};
use super::{ChatAdapter, ChatRequest};

const AUTH_PATH: &str = "/api/v1/auths/";
const NEW_CHAT_PATH: &str = "/api/v2/chats/new";
const COMPLETIONS_PATH: &str = "/api/v2/chat/completions";
const MODELS_PATH: &str = "/api/models";

pub const DEFAULT_MODEL: &str = "qwen3-max";
const PROTOCOL_VERSION: &str = "2.1";
const CHAT_TYPE: &str = "t2t";
const CHAT_MODE: &str = "normal";

/// Bearer resolved for one account.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct QwenSession {
    pub bearer: Option<String>,
}

impl fmt::Debug for QwenSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QwenSession")
            .field("bearer", &self.bearer.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Whether a model id selects the reasoning variant.
pub fn is_thinking_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    model.contains("thinking") || model.starts_with("qwq")
}

/// Reject `{"success": false, ...}` envelopes returned with a 2xx status.
fn check_envelope(value: &Value) -> Result<(), BridgeError> {
    match embedded_error(value) {
        Some(message) => Err(BridgeError::provider(ProviderKey::QwenWeb.as_str(), message)),
        None => Ok(()),
    }
}

pub struct QwenWebAdapter {
    transport: HttpTransport,
    session: ContextSlot<QwenSession>,
    catalog: Arc<dyn ModelCatalog>,
}

impl QwenWebAdapter {
    pub fn new(profile: ProviderProfile, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            transport: HttpTransport::new(profile),
            session: ContextSlot::new(),
            catalog,
        }
    }

    pub fn from_config(config: &BridgeConfig, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self::new(config.profile(ProviderKey::QwenWeb), catalog)
    }

    pub async fn session(&self, credential: &Credential) -> Result<Arc<QwenSession>, BridgeError> {
        if credential.is_empty() {
            return Err(BridgeError::MissingCredential(
                "qwen-web needs session cookies or a bearer token".into(),
            ));
        }
        self.session
            .get_or_fetch(&credential.fingerprint(), || self.fetch_session(credential))
            .await
    }

    async fn fetch_session(&self, credential: &Credential) -> Result<QwenSession, BridgeError> {
        if let Some(bearer) = credential.bearer_token.clone() {
            return Ok(QwenSession {
                bearer: Some(bearer),
            });
        }
        let request = WireRequest::get(self.transport.profile().url(AUTH_PATH))
            .cookie(&credential.cookie_header)
            .accept("application/json");
        let body = self.transport.send(&request).await?.json()?;
        let bearer = body
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if bearer.is_none() {
            warn!("Qwen auth probe returned no token; continuing with cookies only");
        }
        Ok(QwenSession { bearer })
    }

    fn authed(&self, request: WireRequest, credential: &Credential, session: &QwenSession) -> WireRequest {
        request
            .cookie(&credential.cookie_header)
            .bearer(session.bearer.as_deref())
    }

    /// Create a conversation and return its id.
    pub async fn create_chat(
        &self,
        credential: &Credential,
        session: &QwenSession,
        model: &str,
    ) -> Result<String, BridgeError> {
        let body = json!({
            "title": "New Chat",
            "models": [model],
            "chat_mode": CHAT_MODE,
            "chat_type": CHAT_TYPE,
            "timestamp": Utc::now().timestamp_millis(),
        });
        let request = WireRequest::post_json(self.transport.profile().url(NEW_CHAT_PATH), body);
        let resp = self.transport.send(&self.authed(request, credential, session)).await?.json()?;
        check_envelope(&resp)?;
        let id = resp
            .pointer("/data/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BridgeError::provider(ProviderKey::QwenWeb.as_str(), "create chat returned no id")
            })?;
        debug!(chat_id = id, "Created Qwen chat");
        Ok(id.to_string())
    }

    /// Completion body for one user turn.
    ///
    /// The wire request always streams; buffered mode reads the same SSE body
    /// in one piece.
    pub fn completion_body(&self, chat_id: &str, model: &str, prompt: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "stream": true,
            "incremental_output": true,
            "chat_id": chat_id,
            "chat_mode": CHAT_MODE,
            "model": model,
            "parent_id": null,
            "messages": [{
                "fid": Uuid::new_v4().to_string(),
                "parentId": null,
                "childrenIds": [],
                "role": "user",
                "content": prompt,
                "user_action": "chat",
                "files": [],
                "timestamp": now,
                "models": [model],
                "chat_type": CHAT_TYPE,
                "feature_config": {
                    "thinking_enabled": is_thinking_model(model),
                    "output_schema": "phase",
                    "research_mode": "normal",
                },
                "extra": { "meta": { "subChatType": CHAT_TYPE } },
                "sub_chat_type": CHAT_TYPE,
            }],
            "version": PROTOCOL_VERSION,
            "timestamp": now,
        })
    }
}

fn descriptor_from_listing(entry: &Value) -> Option<ModelDescriptor> {
    let id = entry.get("id").and_then(Value::as_str)?;
    let name = entry.get("name").and_then(Value::as_str).unwrap_or(id);
    let meta = entry.pointer("/info/meta");
    let thinking = meta
        .and_then(|m| m.pointer("/capabilities/thinking"))
        .and_then(Value::as_bool)
        .unwrap_or_else(|| is_thinking_model(id));
    let mut model = ModelDescriptor::new(id, name);
    if let Some(description) = meta
        .and_then(|m| m.get("short_description").or_else(|| m.get("description")))
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
    {
        model = model.with_description(description);
    }
    if let Some(ctx) = meta
        .and_then(|m| m.get("max_context_length"))
        .and_then(Value::as_u64)
    {
        model = model.with_context_length(ctx);
    }
    Some(if thinking { model.thinking() } else { model })
}

#[async_trait]
impl ChatAdapter for QwenWebAdapter {
    fn provider_key(&self) -> ProviderKey {
        ProviderKey::QwenWeb
    }

    fn is_model_supported(&self, model_id: &str) -> bool {
        // `qwen3:8b`-style ids are local Ollama tags.
        let model = model_id.to_ascii_lowercase();
        (model.starts_with("qwen") || model.starts_with("qwq")) && !model.contains(':')
    }

    async fn prepare(&self, credential: &Credential) -> Result<(), BridgeError> {
        self.session(credential).await.map(|_| ())
    }

    fn invalidate_context(&self) -> bool {
        self.session.invalidate();
        true
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, BridgeError> {
        let credential = &request.credential;
        let session = self.session(credential).await?;
        let prompt = request.prompt()?;
        let model = request.model_or(DEFAULT_MODEL);

        let (chat_id, created) = match request.conversation_id.as_deref() {
            Some(id) => (id.to_string(), false),
            None => (self.create_chat(credential, &session, model).await?, true),
        };

        let wire = WireRequest::post_json(
            self.transport.profile().url(COMPLETIONS_PATH),
            self.completion_body(&chat_id, model, prompt),
        )
        .query("chat_id", chat_id.as_str())
        .accept("text/event-stream");
        let wire = self.authed(wire, credential, &session);
        debug!(model, new_chat = created, "Qwen completion");

        let decoder = SseDecoder::new(ProviderKey::QwenWeb).with_conversation_id(chat_id.as_str());
        let events = if request.stream {
            decode_stream(self.transport.stream(&wire).await?, decoder)
        } else {
            let resp: RawResponse = self.transport.send(&wire).await?;
            if resp.body.trim_start().starts_with('{') {
                check_envelope(&resp.json()?)?;
            }
            decode_body(resp.body, decoder)
        };

        if !created {
            return Ok(events);
        }
        let announce = StreamEvent::Metadata(ConversationMetadata::conversation(chat_id));
        Ok(futures::stream::once(async move { announce })
            .chain(events)
            .boxed())
    }

    async fn live_models(&self, credential: &Credential) -> Result<Vec<ModelDescriptor>, BridgeError> {
        let session = self.session(credential).await?;
        let request = WireRequest::get(self.transport.profile().url(MODELS_PATH))
            .accept("application/json");
        let body = self
            .transport
            .send(&self.authed(request, credential, &session))
            .await?
            .json()?;
        check_envelope(&body)?;
        let entries = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| BridgeError::provider(ProviderKey::QwenWeb.as_str(), "model list missing data"))?;
        Ok(entries.iter().filter_map(descriptor_from_listing).collect())
    }

    fn fallback_models(&self) -> Vec<ModelDescriptor> {
        self.catalog.load_static_models(ProviderKey::QwenWeb)
    }
}
