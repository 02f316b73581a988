//! Slack webhook entry point
//!
//! Endpoints:
//!   POST /slack/events   – slash commands (form) and Events API callbacks (JSON)
//!
//! The handler always answers within Slack's 3 second window: it verifies,
//! classifies and dedups synchronously, then hands the prompt to the reply
//! dispatcher without awaiting it.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::{
    error::AppResult,
    models::{CommandAck, InboundRequest, UserPrompt, WebhookEvent},
    services::{DispatchError, WebhookService},
    AppState,
};

/// Shown to the user when every reply slot is taken.
const BUSY_TEXT: &str = ":warning: I'm handling too many requests right now, please try again in a moment.";

pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(slack_events))
}

/// POST /slack/events
async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    state.verifier.verify(&headers, &body)?;

    let request = InboundRequest::new(headers, body);
    let event = WebhookService::classify(&request);
    tracing::debug!(kind = %event.kind(), "Classified Slack webhook");

    let response = match event {
        WebhookEvent::UrlVerification { challenge } => {
            tracing::info!("Answering Slack url_verification challenge");
            ([(CONTENT_TYPE, "text/plain")], challenge).into_response()
        }

        WebhookEvent::Retry { attempt, reason } => {
            tracing::info!(
                attempt = attempt.unwrap_or_default(),
                reason = reason.as_deref().unwrap_or("unknown"),
                "Acknowledging Slack retry without reprocessing"
            );
            StatusCode::OK.into_response()
        }

        WebhookEvent::Ignored { reason } => {
            tracing::debug!(%reason, "Ignoring Slack webhook");
            StatusCode::OK.into_response()
        }

        WebhookEvent::EventCallback { event_id, prompt } => {
            if !state.dedup.check_and_remember(&event_id) {
                tracing::info!(%event_id, "Skipping duplicate Slack event");
                return Ok(StatusCode::OK.into_response());
            }
            tracing::info!(%event_id, channel = %prompt.channel_id, "Accepted Slack event");
            if let Err(e) = dispatch(&state, prompt) {
                tracing::warn!(%event_id, error = %e, "Dropping Slack event");
            }
            StatusCode::OK.into_response()
        }

        WebhookEvent::SlashCommand(prompt) => {
            tracing::info!(
                channel = %prompt.channel_id,
                command = prompt.command.as_deref().unwrap_or("-"),
                "Accepted slash command"
            );
            let ack = match dispatch(&state, prompt) {
                Ok(()) => CommandAck::ephemeral(state.config.command_ack_text.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, "Refusing slash command");
                    CommandAck::ephemeral(BUSY_TEXT)
                }
            };
            Json(ack).into_response()
        }
    };

    Ok(response)
}

/// Detach the reply task; the handle is dropped on purpose.
fn dispatch(state: &AppState, prompt: UserPrompt) -> Result<(), DispatchError> {
    state.dispatcher.dispatch(prompt).map(drop)
}

