//! HTTP relay: request normalization, response sessions and the axum server.

pub mod handlers;
pub mod normalize;
pub mod server;
pub mod session;
pub mod stream;
pub mod types;

pub use server::{create_router, run_server, AppState, RequestId};
pub use session::{SessionState, StreamSession};
pub use types::{ChatPayload, ChatRequest, OutputFormat};
