//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::{Extension, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::Instrument;

use super::normalize::normalize;
use super::server::{AppState, RequestId};
use super::session::StreamSession;
use super::stream::spawn_relay;
use super::types::{approximate_tokens, ChatPayload, ChatRequest, Usage};
use crate::error::{Error, Result};
use crate::router::Route;

/// Path of the chat endpoint.
pub const CHAT_PATH: &str = "/api/chat";

/// Handle POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response> {
    let span = tracing::info_span!("chat", request_id = %request_id.0);
    handle_chat(state, body).instrument(span).await
}

async fn handle_chat(state: AppState, body: Bytes) -> Result<Response> {
    let payload: ChatPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejecting unparseable chat body");
        Error::Validation("invalid JSON body".to_string())
    })?;

    let request = normalize(payload, &state.config.defaults, &state.router)?;
    let route = state.router.route(&request.model);

    tracing::info!(
        model = %request.model,
        route = %route,
        format = request.format.as_str(),
        history = request.history.len(),
        "Received chat request"
    );

    match route {
        Route::Primary => relay_primary(&state, request).await,
        Route::Alternate => relay_alternate(&state, request).await,
    }
}

/// Stream tokens from the primary provider.
///
/// The upstream call is opened before headers are committed so that a refused
/// request still gets a proper status code.
async fn relay_primary(state: &AppState, request: ChatRequest) -> Result<Response> {
    let tokens = state.primary.stream_chat(&request).await?;

    let mut session = StreamSession::new(request.format, request.model.clone());
    let response = session.start()?;
    spawn_relay(session, tokens, request.approximate_prompt_tokens());
    Ok(response)
}

/// Fetch one whole completion from the alternate provider and write it out.
async fn relay_alternate(state: &AppState, request: ChatRequest) -> Result<Response> {
    let completion = state.alternate.generate(&request).await?;

    let usage = completion.usage.unwrap_or_else(|| Usage {
        input_tokens: request.approximate_prompt_tokens(),
        output_tokens: approximate_tokens(&completion.text),
    });

    let mut session = StreamSession::new(request.format, request.model.clone());
    let response = session.start()?;
    session.push_token(&completion.text).await;
    session.complete(usage).await;

    tracing::info!(
        model = %request.model,
        output_chars = completion.text.chars().count(),
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Completion relayed"
    );
    Ok(response)
}

/// Handle GET /
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let chat_url = match &state.config.server.public_url {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), CHAT_PATH),
        None => CHAT_PATH.to_string(),
    };

    Json(json!({
        "service": "chat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "endpoints": {
            "chat": {
                "method": "POST",
                "url": chat_url,
                "formats": ["text", "json"],
            }
        },
        "default_model": state.router.default_model(),
        "models": {
            "primary": state.router.primary_models(),
            "alternate": state.router.alternate_models(),
        },
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "chat-relay",
    }))
}
