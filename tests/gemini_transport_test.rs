use std::net::TcpListener;
use std::time::Duration;

use blueprint::{AttemptError, CompletionTransport, GeminiConfig, GeminiTransport};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/test-model:generateContent";

fn transport_for(server: &MockServer) -> GeminiTransport {
    GeminiTransport::new(GeminiConfig {
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        base_url: server.uri(),
        request_timeout: Duration::from_millis(500),
        ..GeminiConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_posts_prompt_and_generation_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [{ "text": "Say hi" }] }],
            "generationConfig": { "topK": 40, "maxOutputTokens": 2048 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = transport_for(&server).complete("Say hi").await.unwrap();
    assert_eq!(text, "hi");
}

#[tokio::test]
async fn test_error_payload_is_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" }
        })))
        .mount(&server)
        .await;

    let err = transport_for(&server).complete("anything").await.unwrap_err();
    assert_eq!(err, AttemptError::Remote("API key not valid".to_string()));
}

#[tokio::test]
async fn test_missing_text_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        })))
        .mount(&server)
        .await;

    let err = transport_for(&server).complete("anything").await.unwrap_err();
    assert!(matches!(err, AttemptError::Malformed(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_server_error_without_payload_is_remote_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = transport_for(&server).complete("anything").await.unwrap_err();
    assert_eq!(err, AttemptError::Remote("HTTP 503 Service Unavailable".to_string()));
}

#[tokio::test]
async fn test_stalled_response_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "candidates": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = transport_for(&server).complete("anything").await.unwrap_err();
    assert!(matches!(err, AttemptError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_connection_refused_is_transport_failure() {
    // Grab a free port, then close it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = GeminiTransport::new(GeminiConfig {
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        base_url: format!("http://127.0.0.1:{}", port),
        request_timeout: Duration::from_millis(500),
        ..GeminiConfig::default()
    })
    .unwrap();

    let err = transport.complete("anything").await.unwrap_err();
    assert!(matches!(err, AttemptError::Transport(_)), "got {:?}", err);
}
