//! Ollama local adapter (native `/api/chat`, newline-delimited JSON).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{BridgeConfig, ProviderProfile};
use crate::credential::Credential;
use crate::decode::{decode_body, decode_stream, EventStream, JsonLinesDecoder};
use crate::error::BridgeError;
use crate::models::{ModelCatalog, ProviderKey};
use crate::types::ModelDescriptor;

use super::http::{HttpTransport, WireRequest};
use super::{ChatAdapter, ChatRequest};

pub const DEFAULT_MODEL: &str = "llama3.2:latest";
const ROUTE_PREFIX: &str = "ollama/";

pub struct OllamaAdapter {
    transport: HttpTransport,
    catalog: Arc<dyn ModelCatalog>,
}

impl OllamaAdapter {
    pub fn new(profile: ProviderProfile, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            transport: HttpTransport::new(profile),
            catalog,
        }
    }

    pub fn from_config(config: &BridgeConfig, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self::new(config.profile(ProviderKey::Ollama), catalog)
    }

    pub fn build_request_body(&self, request: &ChatRequest) -> Value {
        let model = request.model_or(DEFAULT_MODEL);
        let mut body = json!({
            "model": model.strip_prefix(ROUTE_PREFIX).unwrap_or(model),
            "messages": request.messages,
            "stream": request.stream,
        });
        if let (Some(temp), Some(obj)) = (request.temperature, body.as_object_mut()) {
            obj.insert("options".into(), json!({ "temperature": temp }));
        }
        body
    }
}

fn descriptor_from_tag(entry: &Value) -> Option<ModelDescriptor> {
    let name = entry
        .get("name")
        .or_else(|| entry.get("model"))
        .and_then(Value::as_str)?;
    let mut model = ModelDescriptor::new(name, name);
    let details = entry.get("details");
    let family = details.and_then(|d| d.get("family")).and_then(Value::as_str);
    let size = details
        .and_then(|d| d.get("parameter_size"))
        .and_then(Value::as_str);
    match (family, size) {
        (Some(family), Some(size)) => model = model.with_description(format!("{family} {size}")),
        (Some(desc), None) | (None, Some(desc)) => model = model.with_description(desc),
        (None, None) => {}
    }
    Some(model)
}

#[async_trait]
impl ChatAdapter for OllamaAdapter {
    fn provider_key(&self) -> ProviderKey {
        ProviderKey::Ollama
    }

    fn is_model_supported(&self, model_id: &str) -> bool {
        model_id.starts_with(ROUTE_PREFIX) || model_id.contains(':')
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, BridgeError> {
        request.prompt()?;
        let body = self.build_request_body(request);
        debug!(model = %body["model"], stream = request.stream, "Ollama chat");

        // A local server needs no key; a proxied one may want a bearer.
        let wire = WireRequest::post_json(self.transport.profile().url("/api/chat"), body)
            .bearer(request.credential.api_key());
        let decoder = JsonLinesDecoder::new(ProviderKey::Ollama);
        if request.stream {
            Ok(decode_stream(self.transport.stream(&wire).await?, decoder))
        } else {
            let resp = self.transport.send(&wire).await?;
            Ok(decode_body(resp.body, decoder))
        }
    }

    async fn live_models(&self, credential: &Credential) -> Result<Vec<ModelDescriptor>, BridgeError> {
        let request =
            WireRequest::get(self.transport.profile().url("/api/tags")).bearer(credential.api_key());
        let body = self.transport.send(&request).await?.json()?;
        let entries = body.get("models").and_then(Value::as_array).ok_or_else(|| {
            BridgeError::provider(ProviderKey::Ollama.as_str(), "tag list missing models")
        })?;
        Ok(entries.iter().filter_map(descriptor_from_tag).collect())
    }

    fn fallback_models(&self) -> Vec<ModelDescriptor> {
        self.catalog.load_static_models(ProviderKey::Ollama)
    }
}
