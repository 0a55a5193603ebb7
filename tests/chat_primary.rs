//! Integration tests for the primary (streaming) provider path.
//!
//! Verifies that:
//! - Tokens are relayed as chunked text/plain in arrival order
//! - JSON mode returns one envelope with reported or approximated usage
//! - The upstream body carries the assembled conversation and clamped parameters
//! - Upstream refusals before the stream opens become a 502 JSON error
//! - Provider errors after the stream opens are written in-band

mod common;

use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{body_json, body_string, chat_request, sse_body, test_app, test_config, PRIMARY_KEY};

async fn mock_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", format!("Bearer {}", PRIMARY_KEY).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn upstream_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    requests[0].body_json().unwrap()
}

#[tokio::test]
async fn hello_streams_text_with_defaults() {
    let server = MockServer::start().await;
    mock_stream(&server, sse_body(&["Hello", "!", " How can I help?"], None)).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_string(response).await, "Hello! How can I help?");

    let sent = upstream_body(&server).await;
    assert_eq!(sent["model"], "gpt-4o-mini");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["stream_options"], json!({"include_usage": true}));
    assert_eq!(
        sent["messages"],
        json!([
            {"role": "system", "content": "You are a helpful AI assistant."},
            {"role": "user", "content": "Hello"}
        ])
    );
}

#[tokio::test]
async fn json_format_returns_single_envelope_with_reported_usage() {
    let server = MockServer::start().await;
    mock_stream(&server, sse_body(&["Hi", " there"], Some((14, 2)))).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi", "format": "json"})))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(
        body_json(response).await,
        json!({
            "status": "success",
            "response": "Hi there",
            "model": "gpt-4o-mini",
            "usage": {"input_tokens": 14, "output_tokens": 2}
        })
    );
}

#[tokio::test]
async fn json_format_approximates_usage_when_upstream_reports_none() {
    let server = MockServer::start().await;
    mock_stream(&server, sse_body(&["abcdefgh", "i"], None)).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({
            "message": "Hi",
            "system": "Be kind",
            "format": "JSON"
        })))
        .await
        .unwrap();

    let envelope = body_json(response).await;
    assert_eq!(envelope["response"], "abcdefghi");
    // "Be kind" + "Hi" = 9 chars, output 9 chars
    assert_eq!(
        envelope["usage"],
        json!({"input_tokens": 3, "output_tokens": 3})
    );
}

#[tokio::test]
async fn conversation_and_parameters_are_normalized_before_sending() {
    let server = MockServer::start().await;
    mock_stream(&server, sse_body(&["ok"], None)).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({
            "message": "Hi",
            "model": "gpt-4o",
            "system": "Answer tersely.",
            "history": [
                {"role": "user", "content": "A"},
                {"role": "bot", "content": "B"},
                {"role": "assistant"},
                {"role": "assistant", "content": "C"}
            ],
            "temperature": 7,
            "topP": -0.5,
            "maxTokens": "lots"
        })))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "ok");

    let sent = upstream_body(&server).await;
    assert_eq!(sent["model"], "gpt-4o");
    assert_eq!(
        sent["messages"],
        json!([
            {"role": "system", "content": "Answer tersely."},
            {"role": "user", "content": "A"},
            {"role": "assistant", "content": "C"},
            {"role": "user", "content": "Hi"}
        ])
    );
    assert_eq!(sent["temperature"], 2.0);
    assert_eq!(sent["top_p"], 0.0);
    assert_eq!(sent["max_completion_tokens"], 1024);
}

#[tokio::test]
async fn unknown_model_falls_back_to_default() {
    let server = MockServer::start().await;
    mock_stream(&server, sse_body(&["ok"], None)).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi", "model": "not-a-model", "format": "json"})))
        .await
        .unwrap();

    assert_eq!(body_json(response).await["model"], "gpt-4o-mini");
    assert_eq!(upstream_body(&server).await["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn upstream_refusal_is_reported_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "error": "Incorrect API key provided"})
    );
}

#[tokio::test]
async fn mid_stream_error_is_written_in_band_as_text() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Partial\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"The server had an error\"}}\n\n"
    );
    mock_stream(&server, body).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi"})))
        .await
        .unwrap();

    // headers were already committed
    assert_eq!(response.status(), 200);
    assert_eq!(
        body_string(response).await,
        "Partial\nError: The server had an error"
    );
}

#[tokio::test]
async fn mid_stream_error_is_written_in_band_as_json() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Partial\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"The server had an error\"}}\n\n"
    );
    mock_stream(&server, body).await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi", "format": "json"})))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "error": "The server had an error", "model": "gpt-4o-mini"})
    );
}

#[tokio::test]
async fn stream_closed_without_terminator_is_reported_as_failure() {
    let server = MockServer::start().await;
    mock_stream(
        &server,
        "data: {\"choices\":[{\"delta\":{\"content\":\"The answer is\"}}]}\n\n".to_string(),
    )
    .await;

    let app = test_app(test_config(&server.uri(), None));
    let response = app
        .oneshot(chat_request(json!({"message": "Hi", "format": "json"})))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "error": "stream ended before completion", "model": "gpt-4o-mini"})
    );
}
