// Kiro generateAssistantResponse client

use super::eventstream::{frame_to_event, EventStreamDecoder};
use super::thinking::{Segment, ThinkingSplitter};
use super::{payload, BackendEvent, BackendEventStream};
use crate::config::BackendConfig;
use crate::credentials::AccessToken;
use crate::error::{ProxyError, Result};
use crate::models::canonical::CanonicalRequest;
use crate::utils::logging::sanitize;
use futures::{Stream, StreamExt};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const KIRO_VERSION: &str = "0.7.45";
const SDK_VERSION: &str = "1.0.27";

/// Client for the Kiro (CodeWhisperer) streaming chat endpoint.
///
/// Holds no credential of its own; the access token is passed into every
/// [`KiroClient::invoke`] call. Requests are never retried.
pub struct KiroClient {
    http_client: Client,
    endpoint: String,
    fingerprint: String,
}

impl KiroClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://codewhisperer.{}.amazonaws.com", config.region));
        let endpoint = format!(
            "{}/generateAssistantResponse",
            base_url.trim_end_matches('/')
        );

        info!("Kiro backend endpoint: {}", endpoint);

        Ok(Self {
            http_client,
            endpoint,
            fingerprint: machine_fingerprint(),
        })
    }

    /// Opens the upstream call and returns its decoded event stream.
    ///
    /// Fails before any event is produced when the backend answers with a
    /// non-2xx status.
    pub async fn invoke(
        &self,
        request: &CanonicalRequest,
        token: &AccessToken,
    ) -> Result<BackendEventStream> {
        let body = payload::build(request, token.profile_arn());
        let started = Instant::now();

        debug!(
            "Calling Kiro backend: model={} messages={} tools={}",
            request.model_id,
            request.messages.len(),
            request.tools.len()
        );

        let user_agent = format!(
            "aws-sdk-js/{sdk} ua/2.1 os/win32#10.0.19044 lang/js md/nodejs#22.21.1 \
             api/codewhispererstreaming#{sdk} m/E KiroIDE-{kiro}-{fp}",
            sdk = SDK_VERSION,
            kiro = KIRO_VERSION,
            fp = self.fingerprint
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(token.secret())
            .header("Content-Type", "application/json")
            .header("Accept", "application/vnd.amazon.eventstream")
            .header("User-Agent", user_agent)
            .header(
                "x-amz-user-agent",
                format!("aws-sdk-js/{} KiroIDE-{}-{}", SDK_VERSION, KIRO_VERSION, self.fingerprint),
            )
            .header("x-amzn-codewhisperer-optout", "true")
            .header("x-amzn-kiro-agent-mode", "vibe")
            .header("amz-sdk-invocation-id", uuid::Uuid::new_v4().to_string())
            .header("amz-sdk-request", "attempt=1; max=1")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        crate::metrics::record_backend_call(
            &request.model_id,
            status.as_u16(),
            started.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let body = sanitize(&error_text);
            warn!("Kiro backend returned HTTP {}: {}", status, body);
            return Err(ProxyError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let splitter = request.thinking_enabled.then(ThinkingSplitter::new);
        Ok(Box::pin(decode_event_stream(response.bytes_stream(), splitter)))
    }
}

/// Decodes a raw event-stream body into backend events.
///
/// Transport errors and an EOF in the middle of a frame end the stream
/// with `StreamInterrupted`.
pub fn decode_event_stream<S, E>(
    byte_stream: S,
    mut splitter: Option<ThinkingSplitter>,
) -> impl Stream<Item = Result<BackendEvent>> + Send
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut decoder = EventStreamDecoder::new();
        futures::pin_mut!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => {
                    warn!("Backend stream error: {}", e);
                    yield Err(ProxyError::StreamInterrupted(e.to_string()));
                    return;
                }
            }

            loop {
                let frame = match decoder.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let event = match frame_to_event(&frame) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                match (event, splitter.as_mut()) {
                    (BackendEvent::TextDelta(text), Some(splitter)) => {
                        for segment in splitter.push(&text) {
                            yield Ok(segment_event(segment));
                        }
                    }
                    (event, _) => yield Ok(event),
                }
            }
        }

        if let Some(segment) = splitter.as_mut().and_then(ThinkingSplitter::flush) {
            yield Ok(segment_event(segment));
        }

        if decoder.has_partial() {
            yield Err(ProxyError::StreamInterrupted(
                "backend closed the stream inside a frame".to_string(),
            ));
            return;
        }

        debug!("Kiro event stream ended");
    }
}

fn segment_event(segment: Segment) -> BackendEvent {
    match segment {
        Segment::Text(text) => BackendEvent::TextDelta(text),
        Segment::Thinking(text) => BackendEvent::ThinkingDelta(text),
    }
}

/// Stable per-user id for the user agent: SHA-256 of the home directory.
fn machine_fingerprint() -> String {
    let seed = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kiro-proxy".to_string());
    hex::encode(Sha256::digest(seed.as_bytes()))
}
