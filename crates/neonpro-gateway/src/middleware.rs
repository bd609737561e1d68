use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

/// Auth configuration for the gateway.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// API keys that are allowed to call the API. Empty = no auth required.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Config accepting the given keys.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Returns true if authentication is enabled (at least one key configured).
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Auth middleware: validates API key from header or query param.
///
/// Checks `Authorization: Bearer <key>` header first, then `?api_key=<key>` query param.
/// If no API keys are configured, all requests are allowed.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key_from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let key = key_from_header.or_else(|| query.api_key.clone());

    match key {
        Some(k) if auth.api_keys.contains(&k) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected request: invalid API key");
            unauthorized("invalid API key")
        }
        None => {
            warn!(path = %request.uri().path(), "rejected request: missing API key");
            unauthorized("API key required")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized", "message": message})),
    )
        .into_response()
}

/// Query string carrying an API key.
#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    /// Key passed as `?api_key=`.
    pub api_key: Option<String>,
}
