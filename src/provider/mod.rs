//! Provider adapters and the uniform chat contract.
//!
//! Every adapter implements [`ChatAdapter`]: it knows how to open a decoded
//! [`EventStream`] for one request and how to list models. The provided
//! methods [`ChatAdapter::handle_message`] and [`ChatAdapter::get_models`]
//! turn that into the host-facing contract: callbacks fire as events are
//! decoded, failures never escape as `Err`, and model listing always yields
//! a non-empty list.

pub mod gemini_web;
pub mod http;
pub mod ollama;
pub mod openai_compatible;
pub mod qwen_web;
pub mod registry;
pub mod routes;

pub use registry::AdapterRegistry;
pub use routes::{register_routes, Router};

use std::collections::BTreeMap;

use async_trait::async_trait;
use bon::Builder;
use futures::StreamExt;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::decode::EventStream;
use crate::error::BridgeError;
use crate::models::ProviderKey;
use crate::types::{last_user_content, ConversationMetadata, Message, ModelDescriptor, StreamEvent};

/// Options for one [`ChatAdapter::handle_message`] call.
#[derive(Debug, Clone, Builder)]
pub struct HandleMessageOptions {
    /// Opaque credential string as stored by the host.
    #[builder(into)]
    pub credential: String,
    #[builder(default)]
    pub messages: Vec<Message>,
    #[builder(into)]
    pub model: Option<String>,
    /// Composite conversation id echoed back from a previous turn.
    #[builder(into)]
    pub conversation_id: Option<String>,
    #[builder(default = true)]
    pub stream: bool,
    pub temperature: Option<f64>,
    /// Cancelling stops the request; `on_done` still fires once.
    pub cancel: Option<CancellationToken>,
    /// Extra credential metadata; overrides metadata parsed from the credential.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A request after credential normalization.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub credential: Credential,
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub conversation_id: Option<String>,
    pub stream: bool,
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn from_options(options: &HandleMessageOptions) -> Self {
        Self {
            credential: Credential::normalize_with(&options.credential, &options.metadata),
            messages: options.messages.clone(),
            model: options.model.clone().filter(|m| !m.is_empty()),
            conversation_id: options.conversation_id.clone().filter(|c| !c.is_empty()),
            stream: options.stream,
            temperature: options.temperature,
        }
    }

    /// The single outbound turn for providers that keep history server-side.
    pub fn prompt(&self) -> Result<&str, BridgeError> {
        last_user_content(&self.messages)
            .ok_or_else(|| BridgeError::InvalidRequest("no user message to send".into()))
    }

    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

/// Host callbacks, invoked in decode order.
///
/// Exactly one of `on_done` / `on_error` fires per `handle_message` call.
pub trait MessageCallbacks: Send {
    fn on_content(&mut self, text: &str);
    fn on_thinking(&mut self, _text: &str) {}
    fn on_metadata(&mut self, _metadata: &ConversationMetadata) {}
    fn on_done(&mut self);
    fn on_error(&mut self, error: BridgeError);
}

/// Stages of one `handle_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    ContextReady,
    RequestSent,
    Streaming,
    Terminated(Outcome),
}

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Done,
    Error,
    Canceled,
}

struct Tracker {
    provider: Option<ProviderKey>,
    state: Lifecycle,
}

impl Tracker {
    fn new(provider: Option<ProviderKey>, state: Lifecycle) -> Self {
        Self { provider, state }
    }

    fn advance(&mut self, next: Lifecycle) {
        if self.state != next {
            let provider = self.provider.map_or("-", ProviderKey::as_str);
            debug!(provider, from = %self.state, to = %next, "Lifecycle transition");
            self.state = next;
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        self.advance(Lifecycle::Terminated(outcome));
        outcome
    }
}

/// Pump decoded events into callbacks until a terminal event.
///
/// Cancellation stops pumping and reports `on_done`. A stream that ends
/// without a terminal event reports `on_error`.
pub async fn drive(
    mut events: EventStream,
    callbacks: &mut dyn MessageCallbacks,
    cancel: Option<&CancellationToken>,
) -> Outcome {
    let mut tracker = Tracker::new(None, Lifecycle::RequestSent);
    pump(&mut events, callbacks, cancel, &mut tracker).await
}

async fn pump(
    events: &mut EventStream,
    callbacks: &mut dyn MessageCallbacks,
    cancel: Option<&CancellationToken>,
    tracker: &mut Tracker,
) -> Outcome {
    loop {
        let next = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                event = events.next() => Some(event),
            },
            None => Some(events.next().await),
        };
        let Some(event) = next else {
            callbacks.on_done();
            return tracker.finish(Outcome::Canceled);
        };

        match event {
            Some(StreamEvent::ContentDelta(text)) => {
                tracker.advance(Lifecycle::Streaming);
                callbacks.on_content(&text);
            }
            Some(StreamEvent::ThinkingDelta(text)) => {
                tracker.advance(Lifecycle::Streaming);
                callbacks.on_thinking(&text);
            }
            Some(StreamEvent::Metadata(metadata)) => {
                tracker.advance(Lifecycle::Streaming);
                callbacks.on_metadata(&metadata);
            }
            Some(StreamEvent::Done) => {
                callbacks.on_done();
                return tracker.finish(Outcome::Done);
            }
            Some(StreamEvent::Error(error)) => {
                callbacks.on_error(error);
                return tracker.finish(Outcome::Error);
            }
            None => {
                callbacks.on_error(BridgeError::Stream(
                    "stream ended without a terminal event".into(),
                ));
                return tracker.finish(Outcome::Error);
            }
        }
    }
}

/// Await `fut` unless the token fires first.
async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            value = fut => Some(value),
        },
        None => Some(fut.await),
    }
}

/// Uniform adapter contract implemented by every provider.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    fn provider_key(&self) -> ProviderKey;

    /// Pure predicate over model-id naming conventions.
    fn is_model_supported(&self, model_id: &str) -> bool;

    /// Populate cached provider context for this credential.
    async fn prepare(&self, _credential: &Credential) -> Result<(), BridgeError> {
        Ok(())
    }

    /// Drop cached context after a stale-context failure.
    ///
    /// Returns whether anything was invalidated, i.e. whether a retry can
    /// behave differently.
    fn invalidate_context(&self) -> bool {
        false
    }

    /// Build, send and start decoding one request.
    async fn open_stream(&self, request: &ChatRequest) -> Result<EventStream, BridgeError>;

    /// Model list from the provider itself.
    async fn live_models(&self, credential: &Credential) -> Result<Vec<ModelDescriptor>, BridgeError>;

    /// Deterministic list used when the live call fails.
    fn fallback_models(&self) -> Vec<ModelDescriptor>;

    /// Run one message exchange, reporting everything through `callbacks`.
    async fn handle_message(
        &self,
        options: HandleMessageOptions,
        callbacks: &mut dyn MessageCallbacks,
    ) {
        let provider = self.provider_key();
        let cancel = options.cancel.clone();
        let request = ChatRequest::from_options(&options);
        let mut tracker = Tracker::new(Some(provider), Lifecycle::Idle);

        if request.credential.is_bearer_expired() {
            warn!(provider = %provider, "Bearer token in credential has expired");
        }

        let mut retried = false;
        let mut events = loop {
            let attempt = async {
                self.prepare(&request.credential).await?;
                tracker.advance(Lifecycle::ContextReady);
                self.open_stream(&request).await
            };
            match cancellable(cancel.as_ref(), attempt).await {
                None => {
                    callbacks.on_done();
                    tracker.finish(Outcome::Canceled);
                    return;
                }
                Some(Ok(events)) => break events,
                Some(Err(err)) if !retried && err.is_stale_context() && self.invalidate_context() => {
                    warn!(provider = %provider, error = %err, "Provider context looks stale; refetching once");
                    retried = true;
                }
                Some(Err(err)) => {
                    callbacks.on_error(err);
                    tracker.finish(Outcome::Error);
                    return;
                }
            }
        };
        tracker.advance(Lifecycle::RequestSent);

        pump(&mut events, callbacks, cancel.as_ref(), &mut tracker).await;
    }

    /// Live model list, or the fallback list plus a diagnostic entry.
    async fn get_models(&self, credential: &str) -> Vec<ModelDescriptor> {
        let credential = Credential::normalize(credential);
        match self.live_models(&credential).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => self.fallback_models(),
            Err(err) => {
                warn!(provider = %self.provider_key(), error = %err, "Live model listing failed; using fallback list");
                let mut models = self.fallback_models();
                models.push(ModelDescriptor::diagnostic(format!(
                    "{} model listing failed: {err}",
                    self.provider_key()
                )));
                models
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Default)]
    struct Log(Vec<String>);

    impl MessageCallbacks for Log {
        fn on_content(&mut self, text: &str) {
            self.0.push(format!("content:{text}"));
        }
        fn on_thinking(&mut self, text: &str) {
            self.0.push(format!("thinking:{text}"));
        }
        fn on_done(&mut self) {
            self.0.push("done".into());
        }
        fn on_error(&mut self, error: BridgeError) {
            self.0.push(format!("error:{:?}", error.category()));
        }
    }

    fn events(items: Vec<StreamEvent>) -> EventStream {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn drive_stops_at_first_terminal_event() {
        let mut log = Log::default();
        let outcome = drive(
            events(vec![
                StreamEvent::ThinkingDelta("hm".into()),
                StreamEvent::ContentDelta("Hi".into()),
                StreamEvent::Done,
                StreamEvent::ContentDelta("late".into()),
            ]),
            &mut log,
            None,
        )
        .await;
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(log.0, vec!["thinking:hm", "content:Hi", "done"]);
    }

    #[tokio::test]
    async fn drive_reports_unterminated_stream_as_error() {
        let mut log = Log::default();
        let outcome = drive(events(vec![StreamEvent::ContentDelta("a".into())]), &mut log, None).await;
        assert_eq!(outcome, Outcome::Error);
        assert_eq!(log.0, vec!["content:a", "error:Network"]);
    }

    #[tokio::test]
    async fn cancelled_drive_reports_done_once() {
        let token = CancellationToken::new();
        token.cancel();
        let mut log = Log::default();
        let pending = stream::pending::<StreamEvent>().boxed();
        let outcome = drive(pending, &mut log, Some(&token)).await;
        assert_eq!(outcome, Outcome::Canceled);
        assert_eq!(log.0, vec!["done"]);
    }

    #[test]
    fn chat_request_drops_empty_model_and_conversation() {
        let options = HandleMessageOptions::builder()
            .credential("a=1")
            .messages(vec![Message::user("hi")])
            .model("")
            .conversation_id("")
            .build();
        let request = ChatRequest::from_options(&options);
        assert!(request.stream);
        assert_eq!(request.model, None);
        assert_eq!(request.conversation_id, None);
        assert_eq!(request.prompt().unwrap(), "hi");
        assert_eq!(request.model_or("fallback"), "fallback");
    }
}
