//! Session context scraped from the Gemini app shell.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::BridgeError;

const CHAT_BACKEND_MARKER: &str = "assistant-bard-web-server";
const IDENTITY_BACKEND_MARKER: &str = "identityfrontend";

/// Tokens every StreamGenerate call needs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GeminiContext {
    /// Anti-forgery token (`SNlM0e` / `thykhd`), sent as `at`.
    pub at_token: Option<String>,
    /// Session id (`FdrFJe`), sent as `f.sid`.
    pub session_id: Option<String>,
    /// Backend build label (`cfb2h`), sent as `bl`.
    pub build_label: String,
    pub continuation_token: Option<String>,
    /// `/u/N` for secondary Google accounts, empty otherwise.
    pub account_prefix: String,
}

impl fmt::Debug for GeminiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiContext")
            .field("at_token", &self.at_token.as_ref().map(|_| "[redacted]"))
            .field("session_id", &self.session_id)
            .field("build_label", &self.build_label)
            .field("has_continuation", &self.continuation_token.is_some())
            .field("account_prefix", &self.account_prefix)
            .finish()
    }
}

impl GeminiContext {
    /// Context carried in credential metadata; `None` unless all three tokens
    /// are present.
    pub fn from_metadata(credential: &Credential) -> Option<Self> {
        let at_token = credential.meta(&["snlm0e", "SNlM0e", "at", "at_token"])?;
        let session_id = credential.meta(&["f_sid", "fsid", "FdrFJe"])?;
        let build_label = credential.meta(&["bl", "build_label", "cfb2h"])?;
        Some(Self {
            at_token: Some(at_token.to_string()),
            session_id: Some(session_id.to_string()),
            build_label: build_label.to_string(),
            continuation_token: None,
            account_prefix: credential
                .meta(&["account_prefix"])
                .map(str::to_string)
                .unwrap_or_default(),
        })
    }

    /// Extract context from the app shell HTML.
    ///
    /// Fails only when neither the anti-forgery token nor the session id is
    /// present. A missing build label falls back to `fallback_label`.
    pub fn from_app_shell(
        html: &str,
        final_url: &str,
        fallback_label: Option<&str>,
    ) -> Result<Self, BridgeError> {
        let at_token = capture_first(html, &["SNlM0e", "thykhd"]);
        let session_id = capture_first(html, &["FdrFJe"]);
        if at_token.is_none() && session_id.is_none() {
            return Err(BridgeError::ContextExtraction(
                "app shell carried neither an anti-forgery token nor a session id; \
                 cookies may be expired"
                    .into(),
            ));
        }

        let build_label = match pick_build_label(&capture_all(html, "cfb2h")) {
            Some(label) => label,
            None => {
                warn!("No chat build label in app shell; using fallback label");
                fallback_label.unwrap_or_default().to_string()
            }
        };
        let account_prefix = account_prefix(final_url);
        debug!(
            build_label = %build_label,
            account_prefix = %account_prefix,
            has_at = at_token.is_some(),
            has_sid = session_id.is_some(),
            "Extracted Gemini context"
        );

        Ok(Self {
            at_token,
            session_id,
            build_label,
            continuation_token: None,
            account_prefix,
        })
    }

    pub fn with_continuation(&self, token: String) -> Self {
        Self {
            continuation_token: Some(token),
            ..self.clone()
        }
    }
}

/// Matches `"KEY":"value"` in both raw and backslash-escaped inline JSON.
fn key_regex(key: &str) -> Regex {
    let key = regex::escape(key);
    Regex::new(&format!(r#"\\?"{key}\\?"\s*:\s*\\?"([^"\\]+)\\?""#)).expect("valid key regex")
}

fn regex_for(key: &str) -> &'static Regex {
    static SNLM0E: OnceLock<Regex> = OnceLock::new();
    static THYKHD: OnceLock<Regex> = OnceLock::new();
    static FDRFJE: OnceLock<Regex> = OnceLock::new();
    static CFB2H: OnceLock<Regex> = OnceLock::new();
    let cell = match key {
        "SNlM0e" => &SNLM0E,
        "thykhd" => &THYKHD,
        "FdrFJe" => &FDRFJE,
        _ => &CFB2H,
    };
    cell.get_or_init(|| key_regex(key))
}

fn capture_all(html: &str, key: &str) -> Vec<String> {
    regex_for(key)
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn capture_first(html: &str, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| capture_all(html, key).into_iter().next())
}

/// Prefer the chat backend's label; never use the login backend's.
fn pick_build_label(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|label| label.contains(CHAT_BACKEND_MARKER))
        .or_else(|| {
            candidates
                .iter()
                .find(|label| !label.contains(IDENTITY_BACKEND_MARKER))
        })
        .cloned()
}

fn account_prefix(final_url: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(/u/\d+)/").expect("valid account regex"));
    re.captures(final_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
