//! chat-relay - a thin streaming HTTP relay in front of chat LLM providers
//!
//! This library provides configuration, model routing, the upstream provider
//! clients and the axum server exposing `POST /api/chat`.

pub mod config;
pub mod error;
pub mod provider;
pub mod relay;
pub mod router;

pub use config::Config;
pub use error::{Error, Result};
