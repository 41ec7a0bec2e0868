//! Inbound request translation.
//!
//! Turns an OpenAI or Anthropic request body into a `CanonicalRequest`. All
//! client-side validation happens here, so anything that reaches the backend
//! client is known to be well-formed.

mod anthropic;
mod openai;
pub mod tools;

use crate::error::{ProxyError, Result};
use crate::models::anthropic::MessagesRequest;
use crate::models::canonical::{CanonicalRequest, ContentPart};
use crate::models::openai::ChatCompletionRequest;
use crate::models::Protocol;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// A parsed request body, tagged with the protocol it arrived on.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    OpenAi(ChatCompletionRequest),
    Anthropic(MessagesRequest),
}

impl InboundRequest {
    /// Parses a raw body for the given protocol. Malformed JSON, including
    /// invalid UTF-8, is a validation failure.
    pub fn parse(protocol: Protocol, body: impl AsRef<[u8]>) -> Result<Self> {
        let body = body.as_ref();
        let parsed = match protocol {
            Protocol::OpenAi => serde_json::from_slice(body).map(InboundRequest::OpenAi),
            Protocol::Anthropic => serde_json::from_slice(body).map(InboundRequest::Anthropic),
        };
        parsed.map_err(|e| ProxyError::Validation(format!("malformed request body: {}", e)))
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            InboundRequest::OpenAi(_) => Protocol::OpenAi,
            InboundRequest::Anthropic(_) => Protocol::Anthropic,
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            InboundRequest::OpenAi(req) => req.stream.unwrap_or(false),
            InboundRequest::Anthropic(req) => req.stream.unwrap_or(false),
        }
    }

    /// OpenAI `stream_options.include_usage`.
    pub fn include_usage(&self) -> bool {
        match self {
            InboundRequest::OpenAi(req) => req
                .stream_options
                .as_ref()
                .map_or(false, |o| o.include_usage),
            InboundRequest::Anthropic(_) => false,
        }
    }
}

/// Translate an inbound request into the canonical form.
pub fn translate(inbound: InboundRequest) -> Result<CanonicalRequest> {
    let request = match inbound {
        InboundRequest::OpenAi(req) => openai::translate(req)?,
        InboundRequest::Anthropic(req) => anthropic::translate(req)?,
    };
    validate(&request)?;
    Ok(request)
}

/// Checks shared by both protocols, run on the finished request.
fn validate(request: &CanonicalRequest) -> Result<()> {
    if request.messages.is_empty() {
        return Err(ProxyError::Validation(
            "messages must contain at least one message".to_string(),
        ));
    }
    for (i, message) in request.messages.iter().enumerate() {
        if message.parts.is_empty() {
            return Err(ProxyError::Validation(format!("messages[{}] has no content", i)));
        }
    }
    tools::ensure_unique(&request.tools)
}

/// Rejects a blank model and resolves the backend model id.
fn resolve_model(model: &str) -> Result<String> {
    if model.trim().is_empty() {
        return Err(ProxyError::Validation("model is required".to_string()));
    }
    crate::models::mapping::map_model(model)
}

/// Parses a `data:<mime>;base64,<payload>` URI into an image part.
fn image_from_data_uri(url: &str) -> Result<ContentPart> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        ProxyError::Validation("only base64 data URIs are supported for images".to_string())
    })?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| ProxyError::Validation("malformed image data URI".to_string()))?;
    let media_type = header.strip_suffix(";base64").ok_or_else(|| {
        ProxyError::Validation("image data URI must be base64 encoded".to_string())
    })?;

    image_from_base64(media_type, data)
}

fn image_from_base64(media_type: &str, data: &str) -> Result<ContentPart> {
    if !media_type.starts_with("image/") {
        return Err(ProxyError::Validation(format!(
            "unsupported image media type '{}'",
            media_type
        )));
    }
    BASE64
        .decode(data.trim())
        .map_err(|e| ProxyError::Validation(format!("invalid base64 image data: {}", e)))?;

    Ok(ContentPart::Image {
        media_type: media_type.to_string(),
        data: data.trim().to_string(),
    })
}

/// Tool call arguments arrive as JSON text on the OpenAI surface.
fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ProxyError::Validation(format!("tool call arguments are not valid JSON: {}", e)))
}
