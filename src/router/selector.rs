//! Model resolution and provider selection.

use crate::config::{AlternateConfig, PrimaryConfig};

/// Which upstream handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Streaming chat-completion provider
    Primary,
    /// Single-shot generation provider
    Alternate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Primary => "primary",
            Route::Alternate => "alternate",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static routing table built once from configuration.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    primary_models: Vec<String>,
    alternate_models: Vec<String>,
    default_model: String,
}

impl ModelRouter {
    pub fn new(primary: &PrimaryConfig, alternate: &AlternateConfig) -> Self {
        Self {
            primary_models: primary.models.clone(),
            alternate_models: alternate.models.clone(),
            default_model: primary.default_model.clone(),
        }
    }

    /// Build a router from explicit model lists.
    pub fn from_lists(
        primary_models: Vec<String>,
        alternate_models: Vec<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            primary_models,
            alternate_models,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn primary_models(&self) -> &[String] {
        &self.primary_models
    }

    pub fn alternate_models(&self) -> &[String] {
        &self.alternate_models
    }

    /// Whether any provider accepts this model id.
    pub fn is_known(&self, model: &str) -> bool {
        self.alternate_models.iter().any(|m| m == model)
            || self.primary_models.is_empty()
            || self.primary_models.iter().any(|m| m == model)
    }

    /// Resolve the requested model id to the one actually used.
    ///
    /// Missing or blank ids use the default model. Unknown ids also fall back
    /// to the default rather than failing the request.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        let requested = requested.map(str::trim).filter(|m| !m.is_empty());

        match requested {
            Some(model) if self.is_known(model) => model.to_string(),
            Some(model) => {
                tracing::warn!(
                    requested = %model,
                    fallback = %self.default_model,
                    "Unknown model, using default"
                );
                self.default_model.clone()
            }
            None => self.default_model.clone(),
        }
    }

    /// Pick the upstream for an already-resolved model id.
    pub fn route(&self, model: &str) -> Route {
        if self.alternate_models.iter().any(|m| m == model) {
            Route::Alternate
        } else {
            Route::Primary
        }
    }
}
