//! Configuration parsing and validation for chat-relay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use crate::relay::normalize::{TEMPERATURE_RANGE, TOP_P_RANGE};

/// Convention env var for the primary provider key.
pub const PRIMARY_KEY_VAR: &str = "OPENAI_API_KEY";
/// Convention env var for the alternate provider key.
pub const ALTERNATE_KEY_VAR: &str = "GOOGLE_API_KEY";
/// Convention env var for the public base URL.
pub const PUBLIC_URL_VAR: &str = "PRODUCTION_URL";

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub primary: PrimaryConfig,
    pub alternate: AlternateConfig,
    pub defaults: DefaultsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Externally visible base URL, used when advertising endpoints
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_url: None,
        }
    }
}

/// Streaming chat-completion provider used for most models.
#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Model used when the request names none or an unknown one
    pub default_model: String,
    /// Accepted model ids. Empty accepts anything not on the alternate list.
    pub models: Vec<String>,
}

fn default_primary_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_primary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_primary_models() -> Vec<String> {
    ["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "gpt-4.1-nano", "o3-mini"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Single-shot generation provider reserved for an allow-list of models.
#[derive(Debug, Clone)]
pub struct AlternateConfig {
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Model ids routed to this provider
    pub models: Vec<String>,
    /// Upper bound for one generation call, in seconds
    pub timeout_secs: u64,
}

fn default_alternate_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_alternate_models() -> Vec<String> {
    [
        "gemini-2.0-flash",
        "gemini-2.0-flash-lite",
        "gemini-1.5-flash",
        "gemini-1.5-pro",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Defaults applied to generation parameters the client leaves out.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_one")]
    pub temperature: f64,
    #[serde(default = "default_one")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".to_string()
}

fn default_one() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            temperature: default_one(),
            top_p: default_one(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every use is grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was picked up from the convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for [{section}]: {message}")]
    EnvVar {
        var: String,
        section: String,
        message: String,
    },

    #[error("{var} is required to start the relay ([{section}] api_key)")]
    MissingApiKey { var: String, section: String },
}

#[derive(Deserialize, Default)]
struct RawPrimaryConfig {
    url: Option<String>,
    api_key: Option<String>,
    default_model: Option<String>,
    models: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct RawAlternateConfig {
    url: Option<String>,
    api_key: Option<String>,
    models: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

/// Raw configuration deserialized directly from TOML.
/// `api_key` and `public_url` values may contain `${VAR}` references not yet expanded.
#[derive(Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    primary: RawPrimaryConfig,
    #[serde(default)]
    alternate: RawAlternateConfig,
    #[serde(default)]
    defaults: DefaultsConfig,
}

impl RawConfig {
    /// Parse raw configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, section: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            section: section.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                section: section.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            section: section.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in [{}])",
                var_name, section
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve an API key from the config value or the convention env var.
fn resolve_key<F>(
    raw: Option<&str>,
    section: &str,
    convention_var: &str,
    lookup: &F,
) -> Result<(Option<ApiKey>, KeySource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match raw {
        Some(raw_key) if raw_key.contains("${") => {
            let expanded = expand_env_vars_with(raw_key, section, lookup)?;
            if expanded.trim().is_empty() {
                return Ok((None, KeySource::None));
            }
            Ok((Some(ApiKey::from(expanded)), KeySource::EnvExpanded))
        }
        // a blank key is the same as no key
        Some(raw_key) if raw_key.trim().is_empty() => Ok((None, KeySource::None)),
        Some(raw_key) => Ok((Some(ApiKey::from(raw_key)), KeySource::Literal)),
        None => match lookup(convention_var).filter(|v| !v.trim().is_empty()) {
            Some(value) => Ok((
                Some(ApiKey::from(value)),
                KeySource::Convention(convention_var.to_string()),
            )),
            None => Ok((None, KeySource::None)),
        },
    }
}

/// Per-provider key provenance, reported by `chat-relay check`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySources {
    pub primary: KeySource,
    pub alternate: KeySource,
}

impl Config {
    /// Convert raw (deserialized) config to final config using a custom env lookup.
    ///
    /// For each provider key:
    /// - If `api_key` contains `${VAR}`: expand, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - A key that is blank after expansion counts as absent
    /// - If `api_key` is absent: try the convention var, source = `Convention(var)` or `None`
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySources), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (primary_key, primary_source) = resolve_key(
            raw.primary.api_key.as_deref(),
            "primary",
            PRIMARY_KEY_VAR,
            &lookup,
        )?;
        let (alternate_key, alternate_source) = resolve_key(
            raw.alternate.api_key.as_deref(),
            "alternate",
            ALTERNATE_KEY_VAR,
            &lookup,
        )?;

        let mut server = raw.server;
        server.public_url = match server.public_url.take() {
            Some(url) => Some(expand_env_vars_with(&url, "server", &lookup)?),
            None => lookup(PUBLIC_URL_VAR).filter(|v| !v.trim().is_empty()),
        };

        let config = Config {
            server,
            primary: PrimaryConfig {
                url: raw.primary.url.unwrap_or_else(default_primary_url),
                api_key: primary_key,
                default_model: raw
                    .primary
                    .default_model
                    .unwrap_or_else(default_primary_model),
                models: raw.primary.models.unwrap_or_else(default_primary_models),
            },
            alternate: AlternateConfig {
                url: raw.alternate.url.unwrap_or_else(default_alternate_url),
                api_key: alternate_key,
                models: raw.alternate.models.unwrap_or_else(default_alternate_models),
                timeout_secs: raw.alternate.timeout_secs.unwrap_or_else(default_timeout_secs),
            },
            defaults: raw.defaults,
        };

        Ok((
            config,
            KeySources {
                primary: primary_source,
                alternate: alternate_source,
            },
        ))
    }

    /// Convert raw config using the real process environment.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySources), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Load configuration with environment variable expansion.
    ///
    /// This is the startup entry point. It:
    /// 1. Reads the TOML file when one is given (otherwise starts from defaults)
    /// 2. Expands `${VAR}` references and applies convention lookups
    /// 3. Validates the result, including the required primary key
    pub fn load(path: Option<&Path>) -> Result<(Self, KeySources), ConfigError> {
        let raw = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                RawConfig::parse_str(&content)?
            }
            None => RawConfig::default(),
        };

        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;
        Ok((config, key_sources))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.api_key.is_none() {
            return Err(ConfigError::MissingApiKey {
                var: PRIMARY_KEY_VAR.to_string(),
                section: "primary".to_string(),
            });
        }

        if self.alternate.api_key.is_none() {
            tracing::warn!(
                var = ALTERNATE_KEY_VAR,
                "No alternate provider key - requests for alternate models will be rejected"
            );
        }

        if self.primary.url.trim().is_empty() || self.alternate.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Provider URLs must not be empty".to_string(),
            ));
        }

        if self.alternate.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "[alternate] timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self
            .alternate
            .models
            .iter()
            .any(|m| m == &self.primary.default_model)
        {
            return Err(ConfigError::Validation(format!(
                "Default model '{}' is on the alternate allow-list",
                self.primary.default_model
            )));
        }

        let d = &self.defaults;
        let (t_min, t_max) = TEMPERATURE_RANGE;
        if !(t_min..=t_max).contains(&d.temperature) {
            return Err(ConfigError::Validation(format!(
                "[defaults] temperature {} is outside [{}, {}]",
                d.temperature, t_min, t_max
            )));
        }
        let (p_min, p_max) = TOP_P_RANGE;
        if !(p_min..=p_max).contains(&d.top_p) {
            return Err(ConfigError::Validation(format!(
                "[defaults] top_p {} is outside [{}, {}]",
                d.top_p, p_min, p_max
            )));
        }
        if d.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "[defaults] max_tokens must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
