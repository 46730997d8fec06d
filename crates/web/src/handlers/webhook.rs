use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use copycheck_github::webhook::EventPayload;

use crate::AppState;

/// Acknowledges the event immediately and verifies it on a detached task;
/// the response never waits for the check to complete.
pub async fn event_handler(
    State(state): State<AppState>,
    EventPayload { webhook }: EventPayload,
) -> Response {
    tracing::info!(action = %webhook.action, "Inbound event");
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move { dispatcher.dispatch(webhook).await });
    (StatusCode::OK, "Accepted").into_response()
}
