//! Gemini web app adapter.
//!
//! Drives the same `StreamGenerate` endpoint the browser client uses, with
//! session cookies instead of an API key. Each call needs three short-lived
//! tokens scraped from the app shell (see [`context`]) and a positional
//! request array (see [`payload`]). Responses use batchexecute framing.

pub mod context;
pub mod payload;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{BridgeConfig, ProviderProfile};
use crate::context::ContextSlot;
use crate::credential::Credential;
use crate::decode::{decode_body, decode_stream, BatchExecuteDecoder, EventStream};
use crate::error::BridgeError;
use crate::models::{ModelCatalog, ProviderKey};
use crate::types::ModelDescriptor;

use super::http::{HttpTransport, WireRequest};
use super::{ChatAdapter, ChatRequest};

pub use context::GeminiContext;
pub use payload::{ModelTier, SessionTriple, StreamGeneratePayload};

const APP_PATH: &str = "/app";
const STREAM_PATH: &str = "/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";

/// Scraped tokens are refetched after this long.
pub const CONTEXT_TTL: Duration = Duration::from_secs(20 * 60);

pub struct GeminiWebAdapter {
    transport: HttpTransport,
    context: Arc<ContextSlot<GeminiContext>>,
    catalog: Arc<dyn ModelCatalog>,
}

impl GeminiWebAdapter {
    pub fn new(profile: ProviderProfile, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            transport: HttpTransport::new(profile),
            context: Arc::new(ContextSlot::with_ttl(CONTEXT_TTL)),
            catalog,
        }
    }

    pub fn from_config(config: &BridgeConfig, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self::new(config.profile(ProviderKey::GeminiWeb), catalog)
    }

    /// Cached context for this credential, probing the app shell if needed.
    pub async fn context(&self, credential: &Credential) -> Result<Arc<GeminiContext>, BridgeError> {
        credential.require_cookies(ProviderKey::GeminiWeb.as_str())?;
        self.context
            .get_or_fetch(&credential.fingerprint(), || self.fetch_context(credential))
            .await
    }

    async fn fetch_context(&self, credential: &Credential) -> Result<GeminiContext, BridgeError> {
        if let Some(ctx) = GeminiContext::from_metadata(credential) {
            debug!("Using Gemini context from credential metadata");
            return Ok(ctx);
        }
        let profile = self.transport.profile();
        let request = WireRequest::get(profile.url(APP_PATH))
            .cookie(&credential.cookie_header)
            .accept("text/html,application/xhtml+xml");
        let resp = self.transport.send(&request).await?;
        debug!(final_url = %resp.final_url, "Probed Gemini app shell");
        GeminiContext::from_app_shell(
            &resp.body,
            &resp.final_url,
            profile.fallback_build_label.as_deref(),
        )
    }

    /// Assemble the StreamGenerate POST for one payload.
    pub fn stream_request(
        &self,
        credential: &Credential,
        ctx: &GeminiContext,
        payload: &StreamGeneratePayload,
    ) -> WireRequest {
        let profile = self.transport.profile();
        let url = format!(
            "{}{}{}",
            profile.base_url.trim_end_matches('/'),
            ctx.account_prefix,
            STREAM_PATH
        );
        let mut request = WireRequest::post_form(url, payload.form_fields(ctx.at_token.as_deref()))
            .cookie(&credential.cookie_header)
            .accept("*/*")
            .query("bl", ctx.build_label.as_str());
        if let Some(sid) = ctx.session_id.as_deref() {
            request = request.query("f.sid", sid);
        }
        request
            .query("hl", profile.language.as_str())
            .query("_reqid", request_id())
            .query("rt", "c")
    }

    pub fn payload(&self, request: &ChatRequest, ctx: &GeminiContext) -> Result<StreamGeneratePayload, BridgeError> {
        let tier = ModelTier::for_model(request.model.as_deref());
        Ok(StreamGeneratePayload::new(
            request.prompt()?,
            self.transport.profile().language.as_str(),
            tier,
        )
        .with_conversation(request.conversation_id.as_deref())
        .with_continuation(ctx.continuation_token.clone()))
    }
}

/// Six-digit request counter derived from the clock.
fn request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    (millis % 900_000 + 100_000).to_string()
}

#[async_trait]
impl ChatAdapter for GeminiWebAdapter {
    fn provider_key(&self) -> ProviderKey {
        ProviderKey::GeminiWeb
    }

    fn is_model_supported(&self, model_id: &str) -> bool {
        let model = model_id.to_ascii_lowercase();
        model.starts_with("gemini-web") || model.contains("bard")
    }

    async fn prepare(&self, credential: &Credential) -> Result<(), BridgeError> {
        self.context(credential).await.map(|_| ())
    }

    fn invalidate_context(&self) -> bool {
        self.context.invalidate();
        true
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, BridgeError> {
        let credential = &request.credential;
        let ctx = self.context(credential).await?;
        let payload = self.payload(request, &ctx)?;
        let wire = self.stream_request(credential, &ctx, &payload);
        debug!(
            tier = payload.tier as u8,
            new_conversation = payload.session.is_new(),
            "Gemini StreamGenerate"
        );

        let slot = Arc::clone(&self.context);
        let fingerprint = credential.fingerprint();
        let decoder = BatchExecuteDecoder::new(None).with_continuation_sink(Box::new(move |token: String| {
            slot.update(&fingerprint, |ctx| ctx.with_continuation(token));
        }));

        if request.stream {
            Ok(decode_stream(self.transport.stream(&wire).await?, decoder))
        } else {
            let resp = self.transport.send(&wire).await?;
            Ok(decode_body(resp.body, decoder))
        }
    }

    /// There is no listing endpoint; a successful context probe confirms the
    /// session and the configured list is returned.
    async fn live_models(&self, credential: &Credential) -> Result<Vec<ModelDescriptor>, BridgeError> {
        self.context(credential).await?;
        Ok(self.fallback_models())
    }

    fn fallback_models(&self) -> Vec<ModelDescriptor> {
        self.catalog.load_static_models(ProviderKey::GeminiWeb)
    }
}
