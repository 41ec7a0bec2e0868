use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use kiro_proxy::backend::KiroClient;
use kiro_proxy::config::AppConfig;
use kiro_proxy::credentials::{CredentialManager, KiroCredentials};
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "test-key";
const BACKEND_PATH: &str = "/generateAssistantResponse";

/// Encodes one event-stream frame with string headers and zeroed CRCs.
fn frame(headers: &[(&str, &str)], payload: &str) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total = 16 + header_bytes.len() + payload.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(&[0; 4]);
    out
}

fn event(event_type: &str, payload: Value) -> Vec<u8> {
    frame(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/json"),
        ],
        &payload.to_string(),
    )
}

fn text(content: &str) -> Vec<u8> {
    event("assistantResponseEvent", json!({ "content": content }))
}

fn stop(reason: &str) -> Vec<u8> {
    event("messageMetadataEvent", json!({ "stopReason": reason }))
}

fn tool_fragment(name: Option<&str>, input: &str) -> Vec<u8> {
    let mut payload = json!({ "toolUseId": "tooluse_1", "input": input });
    if let Some(name) = name {
        payload["name"] = json!(name);
    }
    event("toolUseEvent", payload)
}

fn tool_events() -> Vec<u8> {
    [
        tool_fragment(Some("get_weather"), "{\"city\":"),
        tool_fragment(None, "\"Par"),
        tool_fragment(None, "is\"}"),
        stop("tool_use"),
    ]
    .concat()
}

async fn app(server: &mockito::ServerGuard) -> Router {
    app_with(server, |_| {}).await
}

async fn app_with(server: &mockito::ServerGuard, customize: impl FnOnce(&mut AppConfig)) -> Router {
    let mut config = AppConfig::default();
    config.api_key = API_KEY.to_string();
    config.backend.base_url = Some(server.url());
    config.credentials.refresh_url = Some(format!("{}/refreshToken", server.url()));
    config.credentials.refresh_max_attempts = 1;
    customize(&mut config);

    let creds: KiroCredentials = serde_json::from_value(json!({
        "accessToken": "aoaTEST",
        "refreshToken": "aorTEST",
        "expiresAt": (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        "profileArn": "arn:aws:codewhisperer:us-east-1:1:profile/P"
    }))
    .unwrap();

    let credentials = CredentialManager::with_credentials(&config.credentials, creds, None).unwrap();
    let backend = KiroClient::new(&config.backend).unwrap();
    kiro_proxy::server::create_router(config, backend, credentials).unwrap()
}

async fn backend_mock(server: &mut mockito::ServerGuard, body: Vec<u8>) -> mockito::Mock {
    server
        .mock("POST", BACKEND_PATH)
        .match_header("authorization", "Bearer aoaTEST")
        .with_status(200)
        .with_header("content-type", "application/vnd.amazon.eventstream")
        .with_body(body)
        .expect(1)
        .create_async()
        .await
}

fn post(path: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {}", key));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// JSON payloads of every `data:` line except `[DONE]`.
fn sse_data(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

fn openai_request(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4.5",
        "stream": stream,
        "messages": [{ "role": "user", "content": "Hi" }]
    })
}

fn weather_tool_request(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4.5",
        "stream": stream,
        "messages": [{ "role": "user", "content": "Weather in Paris?" }],
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather",
                "parameters": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"]
                }
            }
        }]
    })
}

#[tokio::test]
async fn test_missing_key_rejected_before_backend() {
    let mut server = mockito::Server::new_async().await;
    let backend = server
        .mock("POST", BACKEND_PATH)
        .expect(0)
        .create_async()
        .await;
    let app = app(&server).await;

    let response = app
        .clone()
        .oneshot(post("/v1/chat/completions", None, openai_request(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "authentication_error");

    let response = app
        .oneshot(post(
            "/v1/messages",
            Some("wrong-key"),
            json!({
                "model": "claude-sonnet-4.5",
                "max_tokens": 64,
                "messages": [{ "role": "user", "content": "Hi" }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "authentication_error");

    backend.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_route_accepts_x_api_key() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, [text("Hello!"), stop("end_turn")].concat()).await;
    let app = app(&server).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .header("anthropic-version", "2023-06-01")
        .body(Body::from(
            json!({
                "model": "claude-sonnet-4.5",
                "max_tokens": 64,
                "system": "Be brief.",
                "messages": [{ "role": "user", "content": "Hi" }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello!");
    assert_eq!(body["stop_reason"], "end_turn");
    assert!(body["usage"]["input_tokens"].as_u64().unwrap() > 0);
    backend.assert_async().await;
}

#[tokio::test]
async fn test_openai_streaming_text() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(
        &mut server,
        [text("Hel"), text("lo!"), stop("end_turn")].concat(),
    )
    .await;
    let app = app(&server).await;

    let response = app
        .oneshot(post("/v1/chat/completions", Some(API_KEY), openai_request(true)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_string(response).await;
    assert!(body.trim_end().ends_with("data: [DONE]"));

    let chunks = sse_data(&body);
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello!");

    let finish: Vec<&str> = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["finish_reason"].as_str())
        .collect();
    assert_eq!(finish, vec!["stop"]);

    let id = chunks[0]["id"].as_str().unwrap();
    assert!(id.starts_with("chatcmpl-"));
    assert!(chunks.iter().all(|c| c["id"] == id));
    backend.assert_async().await;
}

#[tokio::test]
async fn test_openai_streaming_tool_call() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, tool_events()).await;
    let app = app(&server).await;

    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(API_KEY),
            weather_tool_request(true),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    let chunks = sse_data(&body);

    let tool_deltas: Vec<&Value> = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["tool_calls"].get(0))
        .collect();
    assert_eq!(tool_deltas[0]["id"], "tooluse_1");
    assert_eq!(tool_deltas[0]["function"]["name"], "get_weather");
    assert!(tool_deltas.iter().all(|d| d["index"] == 0));

    let arguments: String = tool_deltas
        .iter()
        .filter_map(|d| d["function"]["arguments"].as_str())
        .collect();
    assert_eq!(arguments, "{\"city\":\"Paris\"}");

    let finish: Vec<&str> = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["finish_reason"].as_str())
        .collect();
    assert_eq!(finish, vec!["tool_calls"]);
    assert!(body.trim_end().ends_with("data: [DONE]"));
    backend.assert_async().await;
}

#[tokio::test]
async fn test_openai_non_streaming_tool_call() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, tool_events()).await;
    let app = app(&server).await;

    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(API_KEY),
            weather_tool_request(false),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], "chat.completion");
    let choice = &body["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    let call = &choice["message"]["tool_calls"][0];
    assert_eq!(call["id"], "tooluse_1");
    assert_eq!(call["type"], "function");
    assert_eq!(call["function"]["name"], "get_weather");
    assert_eq!(call["function"]["arguments"], "{\"city\":\"Paris\"}");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_missing_stop_reason_finishes_with_stop() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, text("partial answer")).await;
    let app = app(&server).await;

    let response = app
        .oneshot(post("/v1/chat/completions", Some(API_KEY), openai_request(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "partial answer");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_backend_rate_limit_is_surfaced() {
    let mut server = mockito::Server::new_async().await;
    let backend = server
        .mock("POST", BACKEND_PATH)
        .with_status(429)
        .with_body(r#"{"message":"Too many requests"}"#)
        .expect(1)
        .create_async()
        .await;
    let app = app(&server).await;

    let response = app
        .oneshot(post("/v1/chat/completions", Some(API_KEY), openai_request(false)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "rate_limit_error");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_invalid_request_never_reaches_backend() {
    let mut server = mockito::Server::new_async().await;
    let backend = server
        .mock("POST", BACKEND_PATH)
        .expect(0)
        .create_async()
        .await;
    let app = app(&server).await;

    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(API_KEY),
            json!({ "model": "claude-sonnet-4.5", "messages": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_streaming_event_order() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, [text("Hello!"), stop("end_turn")].concat()).await;
    let app = app(&server).await;

    let response = app
        .oneshot(post(
            "/v1/messages",
            Some(API_KEY),
            json!({
                "model": "claude-sonnet-4.5",
                "max_tokens": 64,
                "stream": true,
                "messages": [{ "role": "user", "content": "Hi" }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    let events: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .filter(|name| *name != "ping")
        .collect();
    assert_eq!(
        events,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert!(!body.contains("[DONE]"));
    backend.assert_async().await;
}

#[tokio::test]
async fn test_models_listing() {
    let server = mockito::Server::new_async().await;
    let app = app(&server).await;

    let request = Request::builder()
        .uri("/v1/models")
        .header("authorization", format!("Bearer {}", API_KEY))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(ids.contains(&"claude-sonnet-4.5"));
}

#[tokio::test]
async fn test_health_is_public() {
    let server = mockito::Server::new_async().await;
    let app = app(&server).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["credentials"]["status"], "ok");
    assert_eq!(body["checks"].as_object().unwrap().len(), 1);
}

/// A chat request carrying one base64 image of `image_bytes` encoded bytes.
fn image_request(image_bytes: usize) -> Value {
    let data = "A".repeat(image_bytes);
    json!({
        "model": "claude-sonnet-4.5",
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": "What is in this picture?" },
                { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{}", data) } }
            ]
        }]
    })
}

#[tokio::test]
async fn test_large_image_body_within_limit() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, [text("A picture."), stop("end_turn")].concat()).await;
    let app = app(&server).await;

    let response = app
        .oneshot(post("/v1/chat/completions", Some(API_KEY), image_request(3 * 1024 * 1024)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "A picture.");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_body_over_limit_uses_protocol_envelope() {
    let mut server = mockito::Server::new_async().await;
    let backend = server
        .mock("POST", BACKEND_PATH)
        .expect(0)
        .create_async()
        .await;
    let app = app_with(&server, |config| config.server.body_limit_bytes = 1024 * 1024).await;

    let response = app
        .clone()
        .oneshot(post("/v1/chat/completions", Some(API_KEY), image_request(2 * 1024 * 1024)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let anthropic = json!({
        "model": "claude-sonnet-4.5",
        "max_tokens": 64,
        "messages": [{
            "role": "user",
            "content": [{
                "type": "image",
                "source": { "type": "base64", "media_type": "image/png", "data": "A".repeat(2 * 1024 * 1024) }
            }]
        }]
    });
    let response = app
        .oneshot(post("/v1/messages", Some(API_KEY), anthropic))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "request_too_large");

    backend.assert_async().await;
}

#[tokio::test]
async fn test_non_utf8_body_is_invalid_request() {
    let server = mockito::Server::new_async().await;
    let app = app(&server).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(vec![0xff, 0xfe, b'{']))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_stop_sequences_end_the_answer() {
    let mut server = mockito::Server::new_async().await;
    let backend = server
        .mock("POST", BACKEND_PATH)
        .with_status(200)
        .with_header("content-type", "application/vnd.amazon.eventstream")
        .with_body([text("Answer ST"), text("OP and more"), stop("end_turn")].concat())
        .expect(2)
        .create_async()
        .await;
    let app = app(&server).await;

    let mut request = openai_request(false);
    request["stop"] = json!("STOP");
    let response = app
        .clone()
        .oneshot(post("/v1/chat/completions", Some(API_KEY), request))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Answer ");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    let response = app
        .oneshot(post(
            "/v1/messages",
            Some(API_KEY),
            json!({
                "model": "claude-sonnet-4.5",
                "max_tokens": 64,
                "stop_sequences": ["STOP"],
                "messages": [{ "role": "user", "content": "Hi" }]
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["content"][0]["text"], "Answer ");
    assert_eq!(body["stop_reason"], "stop_sequence");
    assert_eq!(body["stop_sequence"], "STOP");
    backend.assert_async().await;
}

#[tokio::test]
async fn test_request_metrics_label_resolved_model() {
    let mut server = mockito::Server::new_async().await;
    let backend = backend_mock(&mut server, [text("Hi"), stop("end_turn")].concat()).await;
    let app = app(&server).await;

    let mut request = openai_request(false);
    request["model"] = json!("Claude-Sonnet-4-5-20250929");
    let response = app
        .clone()
        .oneshot(post("/v1/chat/completions", Some(API_KEY), request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    backend.assert_async().await;

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let metrics = body_string(app.oneshot(request).await.unwrap()).await;
    assert!(metrics.contains("model=\"CLAUDE_SONNET_4_5_20250929_V1_0\""));
    assert!(!metrics.contains("model=\"Claude-Sonnet-4-5-20250929\""));
}
