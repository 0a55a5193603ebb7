//! Request validation and normalization.
//!
//! Turns a lenient [`ChatPayload`] into a [`ChatRequest`]. Only a missing or
//! blank `message` fails the request; every other field is coerced, clamped
//! or replaced by its default.

use serde_json::Value;

use super::types::{ChatMessage, ChatPayload, ChatRequest, OutputFormat, Role};
use crate::config::DefaultsConfig;
use crate::error::{Error, Result};
use crate::router::ModelRouter;

pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);
pub const TOP_P_RANGE: (f64, f64) = (0.0, 1.0);

/// Validate and normalize a chat payload.
pub fn normalize(
    payload: ChatPayload,
    defaults: &DefaultsConfig,
    router: &ModelRouter,
) -> Result<ChatRequest> {
    let message = payload
        .message
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Validation("message required".to_string()))?
        .to_string();

    let model = router.resolve_model(payload.model.as_ref().and_then(Value::as_str));

    let system = payload
        .system
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| defaults.system_prompt.clone());

    let history = payload
        .history
        .as_ref()
        .map(normalize_history)
        .unwrap_or_default();

    Ok(ChatRequest {
        message,
        model,
        system,
        history,
        temperature: clamp_number(
            payload.temperature.as_ref(),
            defaults.temperature,
            TEMPERATURE_RANGE,
        ),
        top_p: clamp_number(payload.top_p.as_ref(), defaults.top_p, TOP_P_RANGE),
        max_tokens: positive_integer(payload.max_completion_tokens.as_ref(), defaults.max_tokens),
        format: parse_format(payload.format.as_ref()),
    })
}

/// Keep well-formed history entries in their original order.
///
/// Entries that are not objects, lack a string `content`, or carry a
/// missing or unrecognized `role` are dropped.
fn normalize_history(value: &Value) -> Vec<ChatMessage> {
    let Some(entries) = value.as_array() else {
        tracing::debug!("Ignoring non-array history");
        return Vec::new();
    };

    let kept: Vec<ChatMessage> = entries
        .iter()
        .filter_map(|entry| {
            let role = entry.get("role")?.as_str().and_then(Role::parse)?;
            let content = entry.get("content")?.as_str()?;
            Some(ChatMessage::new(role, content))
        })
        .collect();

    if kept.len() != entries.len() {
        tracing::debug!(
            dropped = entries.len() - kept.len(),
            kept = kept.len(),
            "Dropped malformed history entries"
        );
    }
    kept
}

/// Coerce a JSON value to a number, falling back to `default` and clamping into `range`.
fn clamp_number(value: Option<&Value>, default: f64, (min, max): (f64, f64)) -> f64 {
    let number = value
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .unwrap_or(default);
    number.clamp(min, max)
}

/// Coerce a JSON value to a positive integer, falling back to `default`.
fn positive_integer(value: Option<&Value>, default: u32) -> u32 {
    let parsed = value.and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f > 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    });

    match parsed {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => default,
    }
}

fn parse_format(value: Option<&Value>) -> OutputFormat {
    match value.and_then(Value::as_str).map(str::trim) {
        Some(f) if f.eq_ignore_ascii_case("json") => OutputFormat::Json,
        _ => OutputFormat::Text,
    }
}
