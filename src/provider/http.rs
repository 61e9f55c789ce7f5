//! Transport client: shared reqwest client, browser-like headers, status mapping.

use std::sync::OnceLock;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN,
    REFERER, USER_AGENT,
};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderProfile;
use crate::error::BridgeError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No request timeout is set: streams run as long as the provider keeps
/// sending, and callers wrap calls in their own deadline.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, BridgeError>>;

/// Request body encodings used by the adapters.
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

/// A fully built provider request, independent of the HTTP client.
#[derive(Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: WireBody,
    pub cookie: Option<String>,
    pub bearer: Option<String>,
    pub accept: Option<&'static str>,
}

impl std::fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("has_cookie", &self.cookie.is_some())
            .field("has_bearer", &self.bearer.is_some())
            .finish()
    }
}

impl WireRequest {
    fn new(method: Method, url: impl Into<String>, body: WireBody) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body,
            cookie: None,
            bearer: None,
            accept: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, WireBody::Empty)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url, WireBody::Json(body))
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self::new(Method::POST, url, WireBody::Form(fields))
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a cookie header; empty strings are ignored.
    pub fn cookie(mut self, cookie: &str) -> Self {
        if !cookie.is_empty() {
            self.cookie = Some(cookie.to_string());
        }
        self
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.filter(|t| !t.is_empty()).map(str::to_string);
        self
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }
}

/// Buffered response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> Result<Value, BridgeError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// HTTP transport bound to one provider profile.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    profile: ProviderProfile,
}

impl HttpTransport {
    pub fn new(profile: ProviderProfile) -> Self {
        Self::with_client(shared_client().clone(), profile)
    }

    pub fn with_client(client: reqwest::Client, profile: ProviderProfile) -> Self {
        Self { client, profile }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Headers every request to this provider carries.
    pub fn headers(&self, request: &WireRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&self.profile.user_agent) {
            headers.insert(USER_AGENT, val);
        }
        if let Some(origin) = self.profile.origin.as_deref() {
            if let Ok(val) = HeaderValue::from_str(origin) {
                headers.insert(ORIGIN, val);
            }
        }
        if let Some(referer) = self.profile.referer.as_deref() {
            if let Ok(val) = HeaderValue::from_str(referer) {
                headers.insert(REFERER, val);
            }
        }
        for (name, value) in &self.profile.extra_headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }
        match &request.body {
            WireBody::Json(_) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            WireBody::Form(_) => {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded;charset=UTF-8"),
                );
            }
            WireBody::Empty => {}
        }
        if let Some(accept) = request.accept {
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
        }
        if let Some(cookie) = request.cookie.as_deref() {
            if let Ok(val) = HeaderValue::from_str(cookie) {
                headers.insert(COOKIE, val);
            }
        }
        if let Some(token) = request.bearer.as_deref() {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, val);
            }
        }
        headers
    }

    async fn execute(&self, request: &WireRequest) -> Result<reqwest::Response, BridgeError> {
        debug!(method = %request.method, url = %request.url, "Sending provider request");
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(self.headers(request));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            WireBody::Empty => builder,
            WireBody::Json(body) => builder.body(serde_json::to_vec(body)?),
            WireBody::Form(fields) => builder.form(fields),
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::upstream(status, body));
        }
        Ok(resp)
    }

    /// Send and read the whole body.
    pub async fn send(&self, request: &WireRequest) -> Result<RawResponse, BridgeError> {
        let resp = self.execute(request).await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(RawResponse {
            status,
            final_url,
            body,
        })
    }

    /// Send and expose the body as raw chunks.
    pub async fn stream(&self, request: &WireRequest) -> Result<ByteStream, BridgeError> {
        let resp = self.execute(request).await?;
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BridgeError::from))
            .boxed())
    }
}
