//! Credential normalization.
//!
//! Hosts store provider credentials as opaque strings: a raw `Cookie` header,
//! a JSON envelope `{"cookies": ..., "metadata": {...}}` (sometimes
//! JSON-encoded twice), a Netscape `cookies.txt` export, a bare bearer JWT, or
//! a JWT buried inside a cookie. [`Credential::normalize`] turns all of these
//! into one `{cookie_header, bearer_token, metadata}` triple and never fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BridgeError;

/// Cookie names that carry a bearer JWT, in lookup priority.
const AUTH_COOKIE_NAMES: &[&str] = &[
    "token",
    "stytch_session_jwt",
    "__Secure-next-auth.session-token",
];

/// First segment of every JWT: base64url of `{"`.
const JWT_PREFIX: &str = "eyJ";

/// Canonical credential shape consumed by the adapters.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Semicolon-joined `name=value` pairs.
    pub cookie_header: String,
    pub bearer_token: Option<String>,
    /// Provider-specific extras (anti-forgery token, session id, build label).
    pub metadata: BTreeMap<String, String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cookie_header", &redacted(&self.cookie_header))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "[redacted]"
    }
}

impl Credential {
    /// Normalize an opaque credential string.
    pub fn normalize(raw: &str) -> Self {
        Self::normalize_with(raw, &BTreeMap::new())
    }

    /// Normalize, letting caller-supplied metadata override parsed metadata.
    pub fn normalize_with(raw: &str, provided: &BTreeMap<String, String>) -> Self {
        let trimmed = raw.trim();
        let mut credential = match parse_envelope(trimmed) {
            Some(Envelope::Object(map)) => from_object(&map),
            Some(Envelope::Text(inner)) => from_plain(inner.trim()),
            None => from_plain(trimmed),
        };

        if credential.bearer_token.is_none() {
            credential.bearer_token = scan_auth_cookie(&credential.cookie_header);
        }
        if credential.bearer_token.is_none() && looks_like_jwt(&credential.cookie_header) {
            credential.bearer_token = Some(std::mem::take(&mut credential.cookie_header));
        }

        for (key, value) in provided {
            credential.metadata.insert(key.clone(), value.clone());
        }
        credential
    }

    /// Serialize back into the JSON envelope form accepted by [`Self::normalize`].
    pub fn to_raw(&self) -> String {
        let mut envelope = serde_json::Map::new();
        envelope.insert("cookies".into(), Value::String(self.cookie_header.clone()));
        envelope.insert(
            "metadata".into(),
            Value::Object(
                self.metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        if let Some(token) = &self.bearer_token {
            envelope.insert("token".into(), Value::String(token.clone()));
        }
        Value::Object(envelope).to_string()
    }

    /// True when neither a cookie nor a bearer token was found.
    pub fn is_empty(&self) -> bool {
        self.cookie_header.is_empty() && self.bearer_token.is_none()
    }

    /// First non-empty metadata value among `keys`.
    pub fn meta(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.metadata.get(*key))
            .map(|v| v.as_str())
            .find(|v| !v.is_empty())
    }

    /// Cookie header, or `MissingCredential` when there is none.
    pub fn require_cookies(&self, provider: &str) -> Result<&str, BridgeError> {
        if self.cookie_header.is_empty() {
            return Err(BridgeError::MissingCredential(format!(
                "{provider} needs browser session cookies"
            )));
        }
        Ok(&self.cookie_header)
    }

    /// Key usable as an `Authorization: Bearer` secret.
    ///
    /// A plain string without cookie syntax (e.g. `sk-...`) is treated as an
    /// API key.
    pub fn api_key(&self) -> Option<&str> {
        if let Some(token) = &self.bearer_token {
            return Some(token);
        }
        let header = self.cookie_header.as_str();
        (!header.is_empty() && !header.contains('=')).then_some(header)
    }

    /// Stable identifier of the account behind this credential.
    ///
    /// Used to key cached provider context; never contains the secret itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cookie_header.as_bytes());
        hasher.update(b"\n");
        if let Some(token) = &self.bearer_token {
            hasher.update(token.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// `exp` claim of the bearer JWT, if it decodes.
    pub fn bearer_expiry(&self) -> Option<DateTime<Utc>> {
        let token = self.bearer_token.as_deref()?;
        let payload = token.split('.').nth(1)?;
        let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: Value = serde_json::from_slice(&decoded).ok()?;
        let exp = claims.get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }

    pub fn is_bearer_expired(&self) -> bool {
        self.bearer_expiry().is_some_and(|exp| exp <= Utc::now())
    }
}

enum Envelope {
    Object(serde_json::Map<String, Value>),
    Text(String),
}

/// Parse the JSON envelope, unwrapping one extra level of string encoding.
fn parse_envelope(trimmed: &str) -> Option<Envelope> {
    if !(trimmed.starts_with('{') || trimmed.starts_with('"')) {
        return None;
    }
    let parsed: Value = serde_json::from_str(trimmed).ok()?;
    match parsed {
        Value::Object(map) => Some(Envelope::Object(map)),
        Value::String(inner) => match serde_json::from_str::<Value>(inner.trim()) {
            Ok(Value::Object(map)) => Some(Envelope::Object(map)),
            _ => Some(Envelope::Text(inner)),
        },
        _ => None,
    }
}

fn from_object(map: &serde_json::Map<String, Value>) -> Credential {
    let cookie_header = map.get("cookies").map(join_cookies).unwrap_or_default();

    let metadata = match map.get("metadata") {
        Some(Value::Object(meta)) => meta
            .iter()
            .filter_map(|(k, v)| value_text(v).map(|text| (k.clone(), text)))
            .collect(),
        _ => BTreeMap::new(),
    };

    let bearer_token = ["token", "bearer"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(|t| t.trim().trim_start_matches("Bearer ").trim())
        .find(|t| !t.is_empty())
        .map(str::to_string);

    Credential {
        cookie_header,
        bearer_token,
        metadata,
    }
}

fn from_plain(trimmed: &str) -> Credential {
    if let Some(token) = trimmed.strip_prefix("Bearer ") {
        return Credential {
            bearer_token: Some(token.trim().to_string()).filter(|t| !t.is_empty()),
            ..Default::default()
        };
    }
    let cookie_header = if is_netscape_export(trimmed) {
        netscape_to_header(trimmed)
    } else {
        trimmed.to_string()
    };
    Credential {
        cookie_header,
        ..Default::default()
    }
}

/// Join a `cookies` field: an ordered map, a verbatim string, or a browser
/// export list of `{name, value}` objects.
fn join_cookies(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| value_text(v).map(|text| format!("{k}={text}")))
            .collect::<Vec<_>>()
            .join("; "),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let value = item.get("value").and_then(value_text).unwrap_or_default();
                Some(format!("{name}={value}"))
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_netscape_export(text: &str) -> bool {
    text.starts_with("# Netscape")
        || text
            .lines()
            .any(|line| line.split('\t').count() >= 7)
}

/// Convert a Netscape `cookies.txt` (domain, flag, path, secure, expiry, name,
/// value) into a `Cookie` header.
fn netscape_to_header(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let line = match line.strip_prefix("#HttpOnly_") {
                Some(rest) => rest,
                None if line.starts_with('#') || line.is_empty() => return None,
                None => line,
            };
            let columns: Vec<&str> = line.split('\t').collect();
            let (name, value) = if columns.len() >= 7 {
                (columns[5].trim(), columns[6].trim())
            } else if columns.len() >= 2 {
                (columns[0].trim(), columns[1].trim())
            } else {
                return None;
            };
            (!name.is_empty()).then(|| format!("{name}={value}"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn auth_cookie_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = AUTH_COOKIE_NAMES
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?:^|[;\s])({names})=([^;\s]+)")).expect("valid auth cookie regex")
    })
}

fn scan_auth_cookie(cookie_header: &str) -> Option<String> {
    let found: Vec<(&str, &str)> = auth_cookie_regex()
        .captures_iter(cookie_header)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();
    AUTH_COOKIE_NAMES.iter().find_map(|wanted| {
        found
            .iter()
            .find(|(name, _)| name == wanted)
            .map(|(_, value)| value.to_string())
    })
}

fn looks_like_jwt(candidate: &str) -> bool {
    candidate.starts_with(JWT_PREFIX)
        && candidate.split('.').count() == 3
        && !candidate.contains([';', '=', ' '])
}
