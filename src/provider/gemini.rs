//! Alternate provider: Google Gemini `generateContent`.
//!
//! Differences from the primary provider:
//! - One non-streaming call per request, bounded by a timeout.
//! - `contents` with `parts` instead of `messages`; roles are `user` and `model`.
//! - System text goes into the top-level `systemInstruction`.
//! - Sampling parameters live in `generationConfig`.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use super::upstream_error_message;
use crate::config::{AlternateConfig, ApiKey};
use crate::error::{Error, Result};
use crate::relay::types::{ChatRequest, Role, Usage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl From<&ChatRequest> for GenerateRequest {
    fn from(request: &ChatRequest) -> Self {
        let mut system_parts = vec![Part {
            text: request.system.clone(),
        }];
        let mut contents = Vec::with_capacity(request.history.len() + 1);

        for message in &request.history {
            // the provider calls the assistant "model"; system text has no turn of its own
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => {
                    system_parts.push(Part {
                        text: message.content.clone(),
                    });
                    continue;
                }
            };
            contents.push(Content {
                role: Some(role),
                parts: vec![Part {
                    text: message.content.clone(),
                }],
            });
        }

        contents.push(Content {
            role: Some("user"),
            parts: vec![Part {
                text: request.message.clone(),
            }],
        });

        Self {
            contents,
            system_instruction: Some(Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: request.top_p,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

/// A whole-response completion from the alternate provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Exact counts when the provider reports both
    pub usage: Option<Usage>,
}

/// Extract the completion text, failing when the provider returned none.
fn into_completion(response: GenerateResponse) -> Result<Completion> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(Error::UpstreamProtocol(format!(
            "Prompt blocked by provider: {}",
            reason
        )));
    }

    let candidate = response.candidates.first().ok_or_else(|| {
        Error::UpstreamProtocol("No candidates in provider response".to_string())
    })?;

    let text: String = candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(Error::UpstreamProtocol(format!(
            "Empty completion from provider (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let usage = response.usage_metadata.and_then(|u| {
        Some(Usage {
            input_tokens: u.prompt_token_count?,
            output_tokens: u.candidates_token_count?,
        })
    });

    Ok(Completion { text, usage })
}

/// Single-shot generation client.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(client: Client, config: &AlternateConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Generate a whole completion for `request`.
    pub async fn generate(&self, request: &ChatRequest) -> Result<Completion> {
        let api_key = self.api_key.as_ref().ok_or(Error::AlternateKeyMissing)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = GenerateRequest::from(request);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, timeout = e.is_timeout(), "Failed to reach alternate provider");
                Error::Upstream(e)
            })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to read alternate provider response");
            Error::Upstream(e)
        })?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %response_text,
                "Alternate provider returned error"
            );
            return Err(Error::UpstreamHttp {
                status: status.as_u16(),
                message: upstream_error_message(status.as_u16(), &response_text),
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(error = %e, body = %response_text, "Failed to parse alternate provider response");
            Error::UpstreamProtocol(format!("Malformed response from provider: {}", e))
        })?;

        into_completion(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::types::{ChatMessage, OutputFormat};

    fn request() -> ChatRequest {
        ChatRequest {
            message: "Hi".to_string(),
            model: "gemini-2.0-flash".to_string(),
            system: "Be brief.".to_string(),
            history: vec![
                ChatMessage::new(Role::User, "A"),
                ChatMessage::new(Role::Assistant, "B"),
                ChatMessage::new(Role::System, "Answer in French."),
            ],
            temperature: 0.4,
            top_p: 0.8,
            max_tokens: 100,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_request_maps_roles_and_config() {
        let json = serde_json::to_value(GenerateRequest::from(&request())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "A"}]},
                    {"role": "model", "parts": [{"text": "B"}]},
                    {"role": "user", "parts": [{"text": "Hi"}]}
                ],
                "systemInstruction": {
                    "parts": [{"text": "Be brief."}, {"text": "Answer in French."}]
                },
                "generationConfig": {
                    "temperature": 0.4,
                    "topP": 0.8,
                    "maxOutputTokens": 100
                }
            })
        );
    }

    fn parse(body: serde_json::Value) -> Result<Completion> {
        into_completion(serde_json::from_value::<GenerateResponse>(body).unwrap())
    }

    #[test]
    fn test_completion_joins_parts_and_reads_usage() {
        let completion = parse(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Bon"}, {"text": "jour"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
        }))
        .unwrap();

        assert_eq!(completion.text, "Bonjour");
        assert_eq!(
            completion.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn test_missing_candidates_is_protocol_error() {
        assert!(matches!(
            parse(serde_json::json!({})),
            Err(Error::UpstreamProtocol(_))
        ));
    }

    #[test]
    fn test_empty_text_is_protocol_error() {
        let err = parse(serde_json::json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::UpstreamProtocol(_)));
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn test_blocked_prompt_is_protocol_error() {
        let err = parse(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_partial_usage_is_dropped() {
        let completion = parse(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "ok"}]}}],
            "usageMetadata": {"promptTokenCount": 4}
        }))
        .unwrap();
        assert_eq!(completion.usage, None);
    }

    #[tokio::test]
    async fn test_generate_without_key_never_sends() {
        let config = AlternateConfig {
            // unroutable: a request here would fail with a transport error, not this one
            url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            models: vec!["gemini-2.0-flash".to_string()],
            timeout_secs: 1,
        };
        let provider = GeminiProvider::new(Client::new(), &config);
        assert!(matches!(
            provider.generate(&request()).await,
            Err(Error::AlternateKeyMissing)
        ));
    }
}
