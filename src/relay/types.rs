//! Inbound chat payload, normalized request and response envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat request body as sent by the client.
///
/// Every field is kept as a raw JSON value so the normalizer can coerce
/// or default malformed values instead of rejecting the whole request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub model: Option<Value>,
    #[serde(default)]
    pub system: Option<Value>,
    #[serde(default)]
    pub history: Option<Value>,
    #[serde(default)]
    pub temperature: Option<Value>,
    #[serde(default, alias = "topP")]
    pub top_p: Option<Value>,
    #[serde(default, alias = "maxTokens", alias = "max_tokens")]
    pub max_completion_tokens: Option<Value>,
    #[serde(default)]
    pub format: Option<Value>,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a role label. Unrecognized labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A role-tagged message in the assembled conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// How the response body is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Raw tokens streamed as `text/plain`
    #[default]
    Text,
    /// One `application/json` envelope after generation completes
    Json,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text/plain; charset=utf-8",
            OutputFormat::Json => "application/json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }
}

/// A validated chat request. All numeric parameters are within range.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub model: String,
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub format: OutputFormat,
}

impl ChatRequest {
    /// Assemble the conversation sent upstream.
    ///
    /// Order: system instruction, history in original order, current user message.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new(Role::User, self.message.clone()));
        messages
    }

    /// Approximate prompt size in tokens, used when the upstream reports no usage.
    pub fn approximate_prompt_tokens(&self) -> u32 {
        let chars: usize = self.system.chars().count()
            + self.message.chars().count()
            + self
                .history
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>();
        approximate_tokens_for_chars(chars)
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn approximate_tokens(text: &str) -> u32 {
    approximate_tokens_for_chars(text.chars().count())
}

fn approximate_tokens_for_chars(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Token counts reported in the JSON envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Buffered JSON response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub status: String,
    pub response: String,
    pub model: String,
    pub usage: Usage,
}

impl JsonEnvelope {
    pub fn success(response: String, model: String, usage: Usage) -> Self {
        Self {
            status: "success".to_string(),
            response,
            model,
            usage,
        }
    }
}
