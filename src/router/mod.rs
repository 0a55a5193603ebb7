//! Router module for provider selection.
//!
//! Model ids on the alternate allow-list go to the alternate provider;
//! everything else goes to the primary provider. Unknown ids fall back to
//! the configured default model.

mod selector;

pub use selector::{ModelRouter, Route};
