//! Shared setup for the relay integration tests.
//!
//! Fake upstream providers are `wiremock` servers; the relay router is driven
//! in-process with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::body::Body;
use http::{Request, Response};

use chat_relay::config::{
    AlternateConfig, ApiKey, Config, DefaultsConfig, PrimaryConfig, ServerConfig,
};
use chat_relay::relay::{create_router, AppState};

pub const PRIMARY_KEY: &str = "sk-test-primary";
pub const ALTERNATE_KEY: &str = "g-test-alternate";

/// Build a config whose providers both point at `upstream` (a wiremock base URI).
pub fn test_config(upstream: &str, alternate_key: Option<&str>) -> Config {
    Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            public_url: None,
        },
        primary: PrimaryConfig {
            url: format!("{}/v1", upstream),
            api_key: Some(ApiKey::from(PRIMARY_KEY)),
            default_model: "gpt-4o-mini".to_string(),
            models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
        },
        alternate: AlternateConfig {
            url: format!("{}/v1beta", upstream),
            api_key: alternate_key.map(ApiKey::from),
            models: vec!["gemini-2.0-flash".to_string(), "gemini-1.5-pro".to_string()],
            timeout_secs: 30,
        },
        defaults: DefaultsConfig::default(),
    }
}

pub fn test_app(config: Config) -> axum::Router {
    create_router(AppState::new(config).expect("build app state"))
}

pub fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Render chat-completion SSE frames for the given content deltas.
pub fn sse_body(tokens: &[&str], usage: Option<(u32, u32)>) -> String {
    let mut body = String::new();
    for token in tokens {
        let frame = serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": token}, "finish_reason": null}],
        });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    if let Some((input, output)) = usage {
        let frame = serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [],
            "usage": {"prompt_tokens": input, "completion_tokens": output, "total_tokens": input + output},
        });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
