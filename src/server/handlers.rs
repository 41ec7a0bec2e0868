// HTTP request handlers

use super::routes::AppState;
use crate::error::{ApiError, ProxyError, Result};
use crate::metrics;
use crate::models::mapping::PUBLIC_MODELS;
use crate::models::openai::{ModelCard, ModelList};
use crate::models::streaming::StreamEvent;
use crate::models::Protocol;
use crate::transcoder::{
    anthropic, collect_response, openai, transcode_stream, OutputChunk, ResponseContext, StreamEncoder,
    Transcoder,
};
use crate::translation::{self, InboundRequest};
use crate::utils::tokens;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut overall_status = HealthStatus::Healthy;

    let (expires_in, needs_refresh) = state.credentials.token_info();
    let credential_check = if expires_in <= 0 {
        overall_status = HealthStatus::Unhealthy;
        HealthCheck {
            status: "error".to_string(),
            message: "Access token expired".to_string(),
        }
    } else if needs_refresh {
        overall_status = HealthStatus::Degraded;
        HealthCheck {
            status: "warning".to_string(),
            message: format!("Access token expires in {} seconds, refresh due", expires_in),
        }
    } else {
        HealthCheck {
            status: "ok".to_string(),
            message: format!("Valid token, expires in {} seconds", expires_in),
        }
    };
    checks.insert("credentials".to_string(), credential_check);
    metrics::update_credential_expiry(expires_in);

    Json(HealthResponse {
        status: overall_status,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn metrics_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}

pub async fn models_handler() -> Json<ModelList> {
    let created = chrono::Utc::now().timestamp();
    Json(ModelList {
        object: "list".to_string(),
        data: PUBLIC_MODELS
            .iter()
            .map(|id| ModelCard {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "anthropic".to_string(),
            })
            .collect(),
    })
}

type RawBody = std::result::Result<Bytes, BytesRejection>;

/// `POST /v1/chat/completions`
pub async fn chat_completions_handler(State(state): State<AppState>, body: RawBody) -> Response {
    handle(Protocol::OpenAi, state, body).await
}

/// `POST /v1/messages`
pub async fn messages_handler(State(state): State<AppState>, body: RawBody) -> Response {
    handle(Protocol::Anthropic, state, body).await
}

/// Body read failures are reported in the caller's error envelope.
fn body_error(rejection: BytesRejection) -> ProxyError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ProxyError::PayloadTooLarge(rejection.body_text())
    } else {
        ProxyError::Validation(format!("could not read request body: {}", rejection.body_text()))
    }
}

/// Labels learned while a request is processed, for metrics.
#[derive(Default)]
struct RequestLabels {
    model: String,
    streaming: bool,
}

async fn handle(protocol: Protocol, state: AppState, body: RawBody) -> Response {
    let started = Instant::now();
    let mut labels = RequestLabels::default();

    let (status, response) = match dispatch(protocol, &state, body, &mut labels).await {
        Ok(response) => (response.status(), response),
        Err(error) => {
            warn!("{} request failed: {}", protocol, error);
            let status = error.status();
            (status, ApiError::new(protocol, error).into_response())
        }
    };

    metrics::record_request(
        protocol.as_str(),
        status.as_u16(),
        &labels.model,
        labels.streaming,
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Translator → credentials → backend → transcoder.
async fn dispatch(
    protocol: Protocol,
    state: &AppState,
    body: RawBody,
    labels: &mut RequestLabels,
) -> Result<Response> {
    let body = body.map_err(body_error)?;
    let inbound = InboundRequest::parse(protocol, &body).map_err(|e| {
        metrics::record_translation_error(protocol.as_str());
        e
    })?;
    drop(body);

    labels.streaming = inbound.is_stream();
    let include_usage = inbound.include_usage();

    let request = translation::translate(inbound).map_err(|e| {
        metrics::record_translation_error(protocol.as_str());
        e
    })?;
    labels.model = request.model_id.clone();

    info!(
        "Received {} request: model={}, messages={}, tools={}, stream={}",
        protocol,
        request.model,
        request.messages.len(),
        request.tools.len(),
        labels.streaming
    );

    let token = state.credentials.get_valid_token().await?;
    let input_tokens = tokens::estimate(&request.prompt_text());
    let events = state.backend.invoke(&request, &token).await?;
    drop(token);

    let ctx = ResponseContext::new(protocol, &request.model, input_tokens);
    let transcoder = Transcoder::new(state.finish_reasons.clone(), input_tokens)
        .with_stop_sequences(request.params.stop.clone());

    if labels.streaming {
        let encoder = StreamEncoder::new(protocol, ctx, include_usage);
        let chunks = transcode_stream(events, transcoder, encoder);
        let keepalive = Duration::from_secs(state.config.transcoder.keepalive_seconds.max(1));
        return sse_response(protocol, chunks, keepalive);
    }

    let message = collect_response(events, transcoder).await?;
    debug!(
        "Collected response: {} blocks, finish={:?}",
        message.blocks.len(),
        message.finish
    );

    let response = match protocol {
        Protocol::OpenAi => Json(openai::render_response(&message, &ctx)).into_response(),
        Protocol::Anthropic => Json(anthropic::render_response(&message, &ctx)).into_response(),
    };
    Ok(response)
}

fn keepalive_frame(protocol: Protocol) -> String {
    match protocol {
        Protocol::Anthropic => StreamEvent::Ping.to_sse(),
        Protocol::OpenAi => ": keep-alive\n\n".to_string(),
    }
}

/// Streams output chunks as SSE, one body frame per chunk, with keep-alive
/// frames while the backend is idle.
fn sse_response<S>(protocol: Protocol, chunks: S, keepalive: Duration) -> Result<Response>
where
    S: Stream<Item = OutputChunk> + Send + 'static,
{
    let label = protocol.as_str();

    let sse_stream = async_stream::stream! {
        futures::pin_mut!(chunks);
        metrics::record_sse_connection("opened");

        let mut chunk_count = 0usize;
        loop {
            tokio::select! {
                next = chunks.next() => {
                    match next {
                        Some(chunk) => {
                            chunk_count += 1;
                            metrics::record_sse_event(label, chunk.event_name());
                            yield Ok::<String, Infallible>(chunk.to_sse());
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(keepalive) => {
                    debug!("Yielding keep-alive frame");
                    metrics::record_sse_event(label, "keepalive");
                    yield Ok(keepalive_frame(protocol));
                }
            }
        }

        metrics::record_sse_connection("completed");
        debug!("SSE stream ended after {} chunks", chunk_count);
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| ProxyError::Internal(format!("Failed to build SSE response: {}", e)))
}
