// HTTP middleware: request ids and API key authentication

use super::routes::AppState;
use crate::error::{ApiError, ProxyError};
use crate::models::Protocol;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::warn;

/// Create request ID layers for the application
pub fn request_id_layers() -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::x_request_id(MakeRequestUuid),
        PropagateRequestIdLayer::x_request_id(),
    )
}

/// Protocol whose error envelope a path answers with.
pub fn protocol_for_path(path: &str) -> Protocol {
    if path.starts_with("/v1/messages") {
        Protocol::Anthropic
    } else {
        Protocol::OpenAi
    }
}

/// Rejects requests whose key does not match the configured API key.
///
/// Keys are compared as SHA-256 digests. `/v1/messages` also accepts the
/// Anthropic-style `x-api-key` header.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let protocol = protocol_for_path(request.uri().path());

    match presented_key(request.headers(), protocol) {
        Some(key) if Sha256::digest(key.as_bytes()).as_slice() == state.api_key_digest => {
            next.run(request).await
        }
        presented => {
            let reason = if presented.is_some() {
                "Invalid API key"
            } else {
                "Missing API key"
            };
            warn!("Rejected {} {}: {}", request.method(), request.uri().path(), reason);
            ApiError::new(protocol, ProxyError::Auth(reason.to_string())).into_response()
        }
    }
}

fn presented_key(headers: &HeaderMap, protocol: Protocol) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, key)| key.trim().to_string());

    match (bearer, protocol) {
        (Some(key), _) => Some(key),
        (None, Protocol::Anthropic) => headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string()),
        (None, Protocol::OpenAi) => None,
    }
}
