use axum::{Router, routing::post};

use crate::AppState;

mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new().route("/githubapp/copyright/event_handler", post(webhook::event_handler))
}
