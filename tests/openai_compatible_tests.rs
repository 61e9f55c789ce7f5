//! OpenAI-compatible adapter against a mock Chat Completions server.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{options, profile_for, RecordingCallbacks};
use webchat_bridge::error::{BridgeError, ErrorCategory};
use webchat_bridge::models::{BuiltinCatalog, ProviderKey};
use webchat_bridge::provider::openai_compatible::OpenAiCompatibleAdapter;
use webchat_bridge::provider::{ChatAdapter, HandleMessageOptions};
use webchat_bridge::types::{Message, DIAGNOSTIC_MODEL_ID};

fn adapter(server: &MockServer) -> OpenAiCompatibleAdapter {
    OpenAiCompatibleAdapter::new(
        profile_for(ProviderKey::OpenAiCompatible, &server.uri()),
        Arc::new(BuiltinCatalog),
    )
}

#[tokio::test]
async fn streaming_completion_with_reasoning() {
    let server = MockServer::start().await;
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"reasoning_content":"thinking..."}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        "data: [DONE]",
    ]
    .join("\n\n");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = HandleMessageOptions::builder()
        .credential("sk-test")
        .messages(vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ])
        .model("openai/gpt-4o")
        .temperature(0.3)
        .build();
    let mut callbacks = RecordingCallbacks::new();
    adapter(&server).handle_message(request, &mut callbacks).await;

    callbacks.assert_single_terminal();
    assert_eq!(callbacks.thinking(), "thinking...");
    assert_eq!(callbacks.content(), "Hello");

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["messages"].as_array().unwrap().len(), 3);
    assert_eq!(sent["temperature"], 0.3);
}

#[tokio::test]
async fn buffered_completion_reports_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Done."}}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
        })))
        .mount(&server)
        .await;

    let mut request = options("sk-test", "hi");
    request.stream = false;
    let mut callbacks = RecordingCallbacks::new();
    adapter(&server).handle_message(request, &mut callbacks).await;

    callbacks.assert_single_terminal();
    assert_eq!(callbacks.content(), "Done.");
}

#[tokio::test]
async fn upstream_rejection_keeps_status_and_body() {
    let server = MockServer::start().await;
    let error_body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string(error_body))
        .expect(1)
        .mount(&server)
        .await;

    let mut callbacks = RecordingCallbacks::new();
    adapter(&server)
        .handle_message(options("sk-bad", "hi"), &mut callbacks)
        .await;

    callbacks.assert_single_terminal();
    let error = &callbacks.errors[0];
    assert_eq!(error.category(), ErrorCategory::Authentication);
    match error {
        BridgeError::UpstreamHttp { status, body } => {
            assert_eq!(*status, 401);
            assert_eq!(body, error_body);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_api_key_fails_without_network() {
    let server = MockServer::start().await;
    let mut callbacks = RecordingCallbacks::new();
    adapter(&server)
        .handle_message(options("session=cookie", "hi"), &mut callbacks)
        .await;

    callbacks.assert_single_terminal();
    assert!(matches!(callbacks.errors[0], BridgeError::MissingCredential(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn conversation_without_user_message_is_invalid() {
    let server = MockServer::start().await;
    let request = HandleMessageOptions::builder()
        .credential("sk-test")
        .messages(vec![Message::assistant("nothing to answer")])
        .build();
    let mut callbacks = RecordingCallbacks::new();
    adapter(&server).handle_message(request, &mut callbacks).await;

    callbacks.assert_single_terminal();
    assert!(matches!(callbacks.errors[0], BridgeError::InvalidRequest(_)));
}

#[tokio::test]
async fn live_models_mark_reasoning_families() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-4o"}, {"id": "o3-mini"}]
        })))
        .mount(&server)
        .await;

    let models = adapter(&server).get_models("sk-test").await;
    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "o3-mini"]);
    assert!(!models[0].is_thinking);
    assert!(models[1].is_thinking);
}

#[tokio::test]
async fn model_listing_failure_appends_diagnostic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let models = adapter(&server).get_models("sk-test").await;
    let fallback: Vec<&str> = models
        .iter()
        .filter(|m| !m.is_diagnostic())
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(fallback, vec!["gpt-4o", "gpt-4o-mini", "o3-mini"]);
    let diagnostic = models.last().unwrap();
    assert_eq!(diagnostic.id, DIAGNOSTIC_MODEL_ID);
    assert!(diagnostic.description.as_deref().unwrap().contains("500"));
}
