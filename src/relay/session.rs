//! Per-request response session.
//!
//! A [`StreamSession`] owns the write side of one chunked HTTP response and
//! enforces `NotStarted -> HeadersSent -> Ended`. `Ended` is terminal: once
//! reached, writes, completions and failures are silently ignored.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::{JsonEnvelope, OutputFormat, Usage};
use crate::error::{Error, Result};

/// Chunks buffered between the session and the HTTP body.
const CHANNEL_CAPACITY: usize = 32;

type Chunk = std::result::Result<Bytes, std::io::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    HeadersSent,
    Ended,
}

pub struct StreamSession {
    state: SessionState,
    format: OutputFormat,
    model: String,
    /// Accumulated output. Sent as one envelope in JSON mode.
    output: String,
    sender: Option<mpsc::Sender<Chunk>>,
}

impl StreamSession {
    pub fn new(format: OutputFormat, model: impl Into<String>) -> Self {
        Self {
            state: SessionState::NotStarted,
            format,
            model: model.into(),
            output: String::new(),
            sender: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Text produced so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Commit the 200 headers and return the response whose body this session feeds.
    pub fn start(&mut self) -> Result<Response> {
        if self.state != SessionState::NotStarted {
            return Err(Error::Internal("response already started".to_string()));
        }

        let (tx, rx) = mpsc::channel::<Chunk>(CHANNEL_CAPACITY);
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, self.format.content_type())
            .header(header::CACHE_CONTROL, "no-cache")
            .header("x-content-type-options", "nosniff")
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .map_err(|e| Error::Internal(format!("failed to build response: {}", e)))?;

        self.sender = Some(tx);
        self.state = SessionState::HeadersSent;
        Ok(response)
    }

    /// Relay one token. Returns `false` once the client is gone or the session has ended.
    pub async fn push_token(&mut self, token: &str) -> bool {
        if self.state != SessionState::HeadersSent {
            return false;
        }

        self.output.push_str(token);
        match self.format {
            OutputFormat::Text => self.send(Bytes::copy_from_slice(token.as_bytes())).await,
            OutputFormat::Json => !self.client_disconnected(),
        }
    }

    /// Finish successfully. JSON mode writes the buffered envelope here.
    pub async fn complete(&mut self, usage: Usage) {
        if self.state != SessionState::HeadersSent {
            return;
        }

        if self.format == OutputFormat::Json {
            let envelope =
                JsonEnvelope::success(std::mem::take(&mut self.output), self.model.clone(), usage);
            match serde_json::to_vec(&envelope) {
                Ok(body) => {
                    self.send(Bytes::from(body)).await;
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize response envelope"),
            }
        }
        self.end();
    }

    /// Finish with an in-band error. Partial output already sent stays sent.
    pub async fn fail(&mut self, error: &Error) {
        if self.state != SessionState::HeadersSent {
            self.end();
            return;
        }

        let marker = match self.format {
            OutputFormat::Text if self.output.is_empty() => format!("Error: {}", error),
            OutputFormat::Text => format!("\nError: {}", error),
            OutputFormat::Json => {
                let mut body = error.to_json();
                body["model"] = serde_json::Value::String(self.model.clone());
                body.to_string()
            }
        };
        self.send(Bytes::from(marker)).await;
        self.end();
    }

    /// Close the response body. Idempotent.
    pub fn end(&mut self) {
        self.sender = None;
        self.state = SessionState::Ended;
    }

    /// Resolves once the client has dropped the response body.
    ///
    /// Resolves immediately when there is no open body.
    pub async fn disconnected(&self) {
        if let Some(tx) = &self.sender {
            tx.closed().await;
        }
    }

    fn client_disconnected(&self) -> bool {
        self.sender.as_ref().map_or(true, |tx| tx.is_closed())
    }

    async fn send(&mut self, bytes: Bytes) -> bool {
        let Some(tx) = &self.sender else {
            return false;
        };
        if tx.send(Ok(bytes)).await.is_err() {
            tracing::debug!("Client went away while writing response");
            self.end();
            return false;
        }
        true
    }
}
