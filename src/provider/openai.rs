//! Primary provider: OpenAI-compatible streaming chat completions.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{header, Client};
use serde::Serialize;

use super::sse::{SseDecoder, SseEvent};
use super::{upstream_error_message, StreamEvent, TokenStream};
use crate::config::{ApiKey, ConfigError, PrimaryConfig, PRIMARY_KEY_VAR};
use crate::error::{Error, Result};
use crate::relay::types::{ChatMessage, ChatRequest};

/// In-band error for a stream that closed before `data: [DONE]`.
pub const TRUNCATED_STREAM: &str = "stream ended before completion";

/// Upstream request body.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
    max_completion_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> From<&'a ChatRequest> for CompletionRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: request.conversation(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_completion_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }
}

/// Streaming chat-completion client.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: &PrimaryConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| ConfigError::MissingApiKey {
            var: PRIMARY_KEY_VAR.to_string(),
            section: "primary".to_string(),
        })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Open a token stream for `request`.
    ///
    /// Connection failures and non-2xx statuses are returned here, before any
    /// output is relayed. Failures after that arrive as an `Err` item.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest::from(request);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach primary provider");
                Error::Upstream(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %error_body,
                "Primary provider returned error"
            );
            return Err(Error::UpstreamHttp {
                status: status.as_u16(),
                message: upstream_error_message(status.as_u16(), &error_body),
            });
        }

        Ok(decode_stream(response.bytes_stream().boxed()))
    }
}

struct DecodeState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Turn the raw SSE byte stream into a lazy [`TokenStream`].
fn decode_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> TokenStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    SseEvent::Token(text) => return Some((Ok(StreamEvent::Token(text)), state)),
                    SseEvent::Usage(usage) => return Some((Ok(StreamEvent::Usage(usage)), state)),
                    SseEvent::Error(message) => {
                        tracing::warn!(error = %message, "Primary provider reported stream error");
                        state.pending.clear();
                        state.finished = true;
                        return Some((Err(Error::UpstreamStream(message)), state));
                    }
                    SseEvent::Done => return None,
                }
            }

            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.process_chunk(&bytes);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Primary stream interrupted");
                    state.finished = true;
                    return Some((
                        Err(Error::UpstreamStream(format!("stream interrupted: {}", e))),
                        state,
                    ));
                }
                None => {
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                    state.finished = true;
                    if !state.decoder.done_received() {
                        // a clean close without the terminator is a truncated generation
                        tracing::warn!("Primary stream ended without [DONE]");
                        state
                            .pending
                            .push_back(SseEvent::Error(TRUNCATED_STREAM.to_string()));
                    }
                }
            }
        }
    });

    Box::pin(stream)
}
