//! Shared test helpers: a recording callback sink and mock-server profiles.

#![allow(dead_code)]

use webchat_bridge::config::ProviderProfile;
use webchat_bridge::error::BridgeError;
use webchat_bridge::models::ProviderKey;
use webchat_bridge::provider::{HandleMessageOptions, MessageCallbacks};
use webchat_bridge::types::{ConversationMetadata, Message};

/// One callback invocation, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Content(String),
    Thinking(String),
    Metadata(ConversationMetadata),
    Done,
    Error,
}

#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub events: Vec<Recorded>,
    pub errors: Vec<BridgeError>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                Recorded::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn thinking(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                Recorded::Thinking(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.events.iter().rev().find_map(|e| match e {
            Recorded::Metadata(m) => m.conversation_id.clone(),
            _ => None,
        })
    }

    pub fn done_count(&self) -> usize {
        self.events.iter().filter(|e| **e == Recorded::Done).count()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Exactly one terminal callback, and it is the last one.
    pub fn assert_single_terminal(&self) {
        assert_eq!(self.done_count() + self.error_count(), 1, "{:?}", self.events);
        assert!(matches!(
            self.events.last(),
            Some(Recorded::Done | Recorded::Error)
        ));
    }
}

impl MessageCallbacks for RecordingCallbacks {
    fn on_content(&mut self, text: &str) {
        self.events.push(Recorded::Content(text.to_string()));
    }

    fn on_thinking(&mut self, text: &str) {
        self.events.push(Recorded::Thinking(text.to_string()));
    }

    fn on_metadata(&mut self, metadata: &ConversationMetadata) {
        self.events.push(Recorded::Metadata(metadata.clone()));
    }

    fn on_done(&mut self) {
        self.events.push(Recorded::Done);
    }

    fn on_error(&mut self, error: BridgeError) {
        self.events.push(Recorded::Error);
        self.errors.push(error);
    }
}

/// Built-in profile pointed at a mock server.
pub fn profile_for(key: ProviderKey, base_url: &str) -> ProviderProfile {
    let mut profile = ProviderProfile::builtin(key);
    profile.base_url = base_url.to_string();
    profile
}

pub fn options(credential: &str, prompt: &str) -> HandleMessageOptions {
    HandleMessageOptions::builder()
        .credential(credential)
        .messages(vec![Message::user(prompt)])
        .build()
}

/// Decode an `application/x-www-form-urlencoded` body field.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    let body = String::from_utf8_lossy(body);
    let url = reqwest::Url::parse(&format!("http://form.test/?{body}")).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
