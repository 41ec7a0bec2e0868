// Error taxonomy and protocol envelope tests

use axum::http::StatusCode;
use axum::response::IntoResponse;
use kiro_proxy::error::{error_body, ApiError, ErrorKind, ProxyError};
use kiro_proxy::models::Protocol;

#[test]
fn test_error_display_messages() {
    let errors = vec![
        ProxyError::Validation("Bad request".to_string()),
        ProxyError::Auth("Missing API key".to_string()),
        ProxyError::Refresh("refresh endpoint returned 500".to_string()),
        ProxyError::Backend {
            status: 429,
            body: "Too many requests".to_string(),
        },
        ProxyError::UpstreamException {
            code: "ThrottlingException".to_string(),
            message: "Rate exceeded".to_string(),
        },
        ProxyError::StreamInterrupted("connection reset".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[test]
fn test_status_codes() {
    assert_eq!(ProxyError::Validation(String::new()).status(), StatusCode::BAD_REQUEST);
    assert_eq!(ProxyError::Auth(String::new()).status(), StatusCode::UNAUTHORIZED);
    assert_eq!(ProxyError::Refresh(String::new()).status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        ProxyError::StreamInterrupted(String::new()).status(),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        ProxyError::Config(String::new()).status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        ProxyError::Backend {
            status: 503,
            body: String::new()
        }
        .status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[test]
fn test_refresh_error_is_authentication() {
    let error = ProxyError::Refresh("token endpoint rejected the refresh token".to_string());
    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert_eq!(error.kind().anthropic_type(), "authentication_error");
}

#[test]
fn test_anthropic_envelope() {
    let body = error_body(Protocol::Anthropic, ErrorKind::RateLimit, "slow down");
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "slow down");
}

#[test]
fn test_openai_envelope() {
    let body = error_body(Protocol::OpenAi, ErrorKind::InvalidRequest, "model is required");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["message"], "model is required");
    assert!(body["error"]["param"].is_null());
    assert!(body.get("type").is_none());
}

#[tokio::test]
async fn test_api_error_response() {
    let response = ApiError::new(
        Protocol::OpenAi,
        ProxyError::Backend {
            status: 429,
            body: "throttled".to_string(),
        },
    )
    .into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}
