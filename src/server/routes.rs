// HTTP routes configuration

use super::handlers::{
    chat_completions_handler, health_handler, messages_handler, metrics_handler, models_handler,
};
use super::middleware::{request_id_layers, require_api_key};
use crate::backend::KiroClient;
use crate::config::AppConfig;
use crate::credentials::CredentialManager;
use crate::error::{ProxyError, Result};
use crate::transcoder::FinishReasonMap;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared, read-only handles for every request. The credential manager is
/// the only component with interior mutability.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Arc<KiroClient>,
    pub credentials: CredentialManager,
    pub finish_reasons: Arc<FinishReasonMap>,
    pub api_key_digest: [u8; 32],
}

pub fn create_router(
    config: AppConfig,
    backend: KiroClient,
    credentials: CredentialManager,
) -> Result<Router> {
    if config.api_key.is_empty() {
        return Err(ProxyError::Config("api_key must not be empty".to_string()));
    }

    let finish_reasons = FinishReasonMap::new(
        &config.transcoder.finish_reasons,
        config.transcoder.fallback_finish_reason,
    );
    let api_key_digest: [u8; 32] = Sha256::digest(config.api_key.as_bytes()).into();
    let body_limit = config.server.body_limit_bytes;

    let state = AppState {
        config: Arc::new(config),
        backend: Arc::new(backend),
        credentials,
        finish_reasons: Arc::new(finish_reasons),
        api_key_digest,
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    // Auth runs before the body is read and before any backend work.
    let api = Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/messages", post(messages_handler))
        .route("/v1/models", get(models_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        // Base64 images make bodies large
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state);

    Ok(app)
}
