//! Token pump: drains the primary provider's stream into a [`StreamSession`].
//!
//! The pump races each upstream pull against the client dropping the
//! response body. When the client goes away first, the upstream stream is
//! dropped, which aborts its HTTP connection.

use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tracing::Instrument;

use super::session::StreamSession;
use super::types::{approximate_tokens, Usage};
use crate::error::Error;
use crate::provider::{StreamEvent, TokenStream};

/// How a relayed stream finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished and the session was completed.
    Completed { output_chars: usize, usage: Usage },
    /// Upstream failed after headers were sent; the error was written in-band.
    Failed(String),
    /// The client went away before upstream finished.
    Disconnected,
}

enum Step {
    Item(Option<crate::Result<StreamEvent>>),
    ClientGone,
}

/// Relay every token of `tokens` into `session`, then complete or fail it.
///
/// `prompt_tokens` is the fallback input count used when upstream reports no usage.
pub async fn relay_tokens(
    session: &mut StreamSession,
    mut tokens: TokenStream,
    prompt_tokens: u32,
) -> RelayOutcome {
    let mut reported: Option<Usage> = None;

    loop {
        let step = tokio::select! {
            biased;
            _ = session.disconnected() => Step::ClientGone,
            item = tokens.next() => Step::Item(item),
        };

        match step {
            Step::ClientGone => {
                session.end();
                return RelayOutcome::Disconnected;
            }
            Step::Item(Some(Ok(StreamEvent::Token(text)))) => {
                if !session.push_token(&text).await {
                    session.end();
                    return RelayOutcome::Disconnected;
                }
            }
            Step::Item(Some(Ok(StreamEvent::Usage(usage)))) => reported = Some(usage),
            Step::Item(Some(Err(e))) => {
                let message = e.to_string();
                session.fail(&e).await;
                return RelayOutcome::Failed(message);
            }
            Step::Item(None) => break,
        }
    }

    let output_chars = session.output().chars().count();
    let usage = reported.unwrap_or_else(|| Usage {
        input_tokens: prompt_tokens,
        output_tokens: approximate_tokens(session.output()),
    });
    session.complete(usage).await;

    RelayOutcome::Completed {
        output_chars,
        usage,
    }
}

/// Run [`relay_tokens`] on a background task.
///
/// A panic while relaying is logged and written in-band as an internal error.
pub fn spawn_relay(mut session: StreamSession, tokens: TokenStream, prompt_tokens: u32) {
    let model = session.model().to_string();

    tokio::spawn(async move {
        let result = AssertUnwindSafe(relay_tokens(&mut session, tokens, prompt_tokens))
            .catch_unwind()
            .await;

        match result {
            Ok(RelayOutcome::Completed {
                output_chars,
                usage,
            }) => tracing::info!(
                model = %model,
                output_chars,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Stream completed"
            ),
            Ok(RelayOutcome::Failed(error)) => {
                tracing::warn!(model = %model, error = %error, "Stream failed after headers were sent")
            }
            Ok(RelayOutcome::Disconnected) => {
                tracing::info!(model = %model, "Client disconnected, upstream stream cancelled")
            }
            Err(_) => {
                tracing::error!(model = %model, "Stream relay panicked");
                session
                    .fail(&Error::Internal("stream relay failed".to_string()))
                    .await;
                session.end();
            }
        }
    }
    .in_current_span());
}
