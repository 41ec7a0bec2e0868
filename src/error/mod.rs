// Error taxonomy for kiro-proxy and its protocol-specific HTTP rendering

use crate::models::Protocol;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request too large: {0}")]
    PayloadTooLarge(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Credential refresh failed: {0}")]
    Refresh(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Backend exception {code}: {message}")]
    UpstreamException { code: String, message: String },

    #[error("Upstream stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Protocol-neutral classification of a failure.
///
/// Both public protocols expose a small fixed set of error types; every
/// `ProxyError` resolves to exactly one of these, which in turn knows its
/// HTTP status and the type string each protocol uses for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    RequestTooLarge,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Overloaded,
    Api,
}

impl ErrorKind {
    /// Closest kind for an upstream HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorKind::InvalidRequest,
            413 => ErrorKind::RequestTooLarge,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            503 | 529 => ErrorKind::Overloaded,
            _ => ErrorKind::Api,
        }
    }

    /// Classifies an AWS exception name such as `ThrottlingException`.
    pub fn from_exception(code: &str) -> Self {
        match code {
            "ValidationException" | "SerializationException" | "ContentLengthExceededException" => {
                ErrorKind::InvalidRequest
            }
            "UnauthorizedException" | "ExpiredTokenException" => ErrorKind::Authentication,
            "AccessDeniedException" => ErrorKind::Permission,
            "ResourceNotFoundException" => ErrorKind::NotFound,
            "ThrottlingException" | "ServiceQuotaExceededException" => ErrorKind::RateLimit,
            "ServiceUnavailableException" => ErrorKind::Overloaded,
            _ => ErrorKind::Api,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Api => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn anthropic_type(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::RequestTooLarge => "request_too_large",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Overloaded => "overloaded_error",
            ErrorKind::Api => "api_error",
        }
    }

    pub fn openai_type(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::RequestTooLarge | ErrorKind::NotFound => {
                "invalid_request_error"
            }
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Overloaded | ErrorKind::Api => "server_error",
        }
    }

    /// Machine-readable `code` field of the OpenAI envelope.
    pub fn openai_code(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Authentication => Some("invalid_api_key"),
            ErrorKind::NotFound => Some("model_not_found"),
            ErrorKind::RateLimit => Some("rate_limit_exceeded"),
            _ => None,
        }
    }
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Validation(_) | ProxyError::Json(_) => ErrorKind::InvalidRequest,
            ProxyError::PayloadTooLarge(_) => ErrorKind::RequestTooLarge,
            ProxyError::Auth(_) | ProxyError::Refresh(_) | ProxyError::InvalidCredentials(_) => {
                ErrorKind::Authentication
            }
            ProxyError::Backend { status, .. } => ErrorKind::from_status(*status),
            ProxyError::UpstreamException { code, .. } => ErrorKind::from_exception(code),
            ProxyError::StreamInterrupted(_) | ProxyError::Http(_) => ErrorKind::Api,
            ProxyError::Config(_)
            | ProxyError::ConfigParsing(_)
            | ProxyError::Io(_)
            | ProxyError::Internal(_) => ErrorKind::Api,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Config(_)
            | ProxyError::ConfigParsing(_)
            | ProxyError::Io(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => self.kind().status(),
        }
    }
}

/// Renders an error body in the envelope a protocol's clients expect.
pub fn error_body(protocol: Protocol, kind: ErrorKind, message: &str) -> serde_json::Value {
    match protocol {
        Protocol::Anthropic => json!({
            "type": "error",
            "error": {
                "type": kind.anthropic_type(),
                "message": message,
            }
        }),
        Protocol::OpenAi => json!({
            "error": {
                "message": message,
                "type": kind.openai_type(),
                "param": null,
                "code": kind.openai_code(),
            }
        }),
    }
}

/// A `ProxyError` bound to the protocol of the route that produced it.
#[derive(Debug)]
pub struct ApiError {
    pub protocol: Protocol,
    pub error: ProxyError,
}

impl ApiError {
    pub fn new(protocol: Protocol, error: ProxyError) -> Self {
        Self { protocol, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = error_body(self.protocol, self.error.kind(), &self.error.to_string());
        (self.error.status(), axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
