//! Generic OpenAI-compatible Chat Completions adapter.
//!
//! Unlike the browser-session adapters this one sends the full message
//! history, since the wire format has a slot for it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{BridgeConfig, ProviderProfile};
use crate::credential::Credential;
use crate::decode::{decode_stream, EventStream, SseDecoder};
use crate::error::BridgeError;
use crate::models::{ModelCatalog, ProviderKey};
use crate::types::{ConversationMetadata, ModelDescriptor, StreamEvent};

use super::http::{HttpTransport, WireRequest};
use super::{ChatAdapter, ChatRequest};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MODEL_PREFIXES: &[&str] = &["gpt-", "chatgpt-", "o1", "o3", "o4-", "openai/"];
const ROUTE_PREFIX: &str = "openai/";

pub struct OpenAiCompatibleAdapter {
    transport: HttpTransport,
    catalog: Arc<dyn ModelCatalog>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(profile: ProviderProfile, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            transport: HttpTransport::new(profile),
            catalog,
        }
    }

    pub fn from_config(config: &BridgeConfig, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self::new(config.profile(ProviderKey::OpenAiCompatible), catalog)
    }

    fn api_key<'a>(&self, credential: &'a Credential) -> Result<&'a str, BridgeError> {
        credential.api_key().ok_or_else(|| {
            BridgeError::MissingCredential("openai-compatible needs an API key".into())
        })
    }

    pub fn build_request_body(&self, request: &ChatRequest) -> Value {
        let model = request.model_or(DEFAULT_MODEL);
        let mut body = serde_json::json!({
            "model": model.strip_prefix(ROUTE_PREFIX).unwrap_or(model),
            "messages": request.messages,
            "stream": request.stream,
        });
        if let (Some(temp), Some(obj)) = (request.temperature, body.as_object_mut()) {
            obj.insert("temperature".into(), temp.into());
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Events equivalent to a streamed reply, from a buffered response.
fn events_from_response(response: ChatResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(reasoning) = choice.message.reasoning_content.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::ThinkingDelta(reasoning));
        }
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::ContentDelta(content));
        }
    }
    if let Some(usage) = response.usage {
        events.push(StreamEvent::Metadata(ConversationMetadata::tokens(usage.total_tokens)));
    }
    events.push(StreamEvent::Done);
    events
}

fn is_reasoning_model(id: &str) -> bool {
    ["o1", "o3", "o4-"].iter().any(|p| id.starts_with(p))
        || id.contains("reasoner")
        || id.contains("thinking")
}

#[async_trait]
impl ChatAdapter for OpenAiCompatibleAdapter {
    fn provider_key(&self) -> ProviderKey {
        ProviderKey::OpenAiCompatible
    }

    fn is_model_supported(&self, model_id: &str) -> bool {
        MODEL_PREFIXES.iter().any(|p| model_id.starts_with(p))
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, BridgeError> {
        let api_key = self.api_key(&request.credential)?;
        request.prompt()?;
        let body = self.build_request_body(request);
        debug!(model = %body["model"], stream = request.stream, "OpenAI-compatible chat");

        let wire = WireRequest::post_json(self.transport.profile().url("chat/completions"), body)
            .bearer(Some(api_key));
        if request.stream {
            let wire = wire.accept("text/event-stream");
            let decoder = SseDecoder::new(ProviderKey::OpenAiCompatible);
            return Ok(decode_stream(self.transport.stream(&wire).await?, decoder));
        }
        let resp = self.transport.send(&wire).await?;
        let parsed: ChatResponse = serde_json::from_str(&resp.body)?;
        Ok(futures::stream::iter(events_from_response(parsed)).boxed())
    }

    async fn live_models(&self, credential: &Credential) -> Result<Vec<ModelDescriptor>, BridgeError> {
        let request = WireRequest::get(self.transport.profile().url("models"))
            .bearer(Some(self.api_key(credential)?));
        let body = self.transport.send(&request).await?.json()?;
        let entries = body.get("data").and_then(Value::as_array).ok_or_else(|| {
            BridgeError::provider(ProviderKey::OpenAiCompatible.as_str(), "model list missing data")
        })?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(|id| {
                let model = ModelDescriptor::new(id, id);
                if is_reasoning_model(id) {
                    model.thinking()
                } else {
                    model
                }
            })
            .collect())
    }

    fn fallback_models(&self) -> Vec<ModelDescriptor> {
        self.catalog.load_static_models(ProviderKey::OpenAiCompatible)
    }
}
