//! Error types for chat-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for chat-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned when an alternate-provider model is requested without a key.
pub const ALTERNATE_KEY_MISSING: &str = "GOOGLE_API_KEY is required for Gemini models.";

/// Main error type for chat-relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Bad or missing client input. The message is shown to the client verbatim.
    #[error("{0}")]
    Validation(String),

    /// Upstream answered with a non-success status.
    #[error("{message}")]
    UpstreamHttp { status: u16, message: String },

    /// Upstream answered 2xx but the body is missing the expected fields.
    #[error("{0}")]
    UpstreamProtocol(String),

    /// Upstream reported a failure after the stream was opened.
    #[error("{0}")]
    UpstreamStream(String),

    #[error("{}", ALTERNATE_KEY_MISSING)]
    AlternateKeyMissing,

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when the error is reported before headers are committed.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::AlternateKeyMissing => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamHttp { .. } | Error::UpstreamProtocol(_) | Error::UpstreamStream(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON error body shared by pre-header responses and in-band JSON errors.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "error": self.to_string(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, axum::Json(self.to_json())).into_response()
    }
}
