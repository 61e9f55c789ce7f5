//! Optional HTTP surface: a `/models` listing per adapter.
//!
//! The host owns the actual HTTP framework; it exposes a [`Router`] and the
//! adapter registers plain async handlers on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use super::ChatAdapter;

/// Header the host copies the stored credential from.
pub const CREDENTIAL_HEADER: &str = "x-webchat-credential";

/// Incoming request, reduced to what the handlers read.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub status: u16,
    pub body: Value,
}

impl RouteResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn not_found(path: &str) -> Self {
        Self {
            status: 404,
            body: json!({ "error": format!("no route for {path}") }),
        }
    }
}

pub type RouteHandler = Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, RouteResponse> + Send + Sync>;

/// Registration hook provided by the host.
pub trait Router {
    fn get(&mut self, path: &str, handler: RouteHandler);
}

/// Path an adapter's model listing is served under.
pub fn models_path(adapter: &dyn ChatAdapter) -> String {
    format!("/{}/models", adapter.provider_key())
}

/// Expose `GET /<provider>/models`, answering with `{"models": [...]}`.
pub fn register_routes(adapter: Arc<dyn ChatAdapter>, router: &mut dyn Router) {
    let path = models_path(adapter.as_ref());
    router.get(
        &path,
        Arc::new(move |request: RouteRequest| -> BoxFuture<'static, RouteResponse> {
            let adapter = Arc::clone(&adapter);
            Box::pin(async move {
                let models = adapter.get_models(&request.credential).await;
                RouteResponse::ok(json!({ "models": models }))
            })
        }),
    );
}

/// In-memory router, for hosts without their own and for tests.
#[derive(Default)]
pub struct RouteTable {
    routes: BTreeMap<String, RouteHandler>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }

    pub async fn dispatch(&self, path: &str, request: RouteRequest) -> RouteResponse {
        match self.routes.get(path) {
            Some(handler) => handler(request).await,
            None => RouteResponse::not_found(path),
        }
    }
}

impl Router for RouteTable {
    fn get(&mut self, path: &str, handler: RouteHandler) {
        self.routes.insert(path.to_string(), handler);
    }
}
