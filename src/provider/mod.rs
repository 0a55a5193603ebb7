//! Upstream LLM provider clients.
//!
//! - [`openai`]: the primary chat-completion provider, consumed as a
//!   pull-based [`TokenStream`].
//! - [`gemini`]: the alternate provider, one non-streaming generate call.

pub mod gemini;
pub mod openai;
pub(crate) mod sse;

use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::relay::types::Usage;

pub use gemini::{Completion, GeminiProvider};
pub use openai::OpenAiProvider;

/// An item pulled from the primary provider's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One incremental text fragment
    Token(String),
    /// Exact token counts, when the upstream reports them
    Usage(Usage),
}

/// Lazy sequence of stream events. Ends after the upstream signals completion;
/// an `Err` item is terminal.
pub type TokenStream = Pin<Box<dyn Stream<Item = crate::Result<StreamEvent>> + Send>>;

/// Extract a human-readable message from an upstream error body.
///
/// Understands `{"error": {"message": ...}}` and `{"error": "..."}`,
/// otherwise falls back to `HTTP error: status N`.
pub fn upstream_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP error: status {}", status))
}
