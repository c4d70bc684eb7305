//! HTTP surface of the bot

pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use webhook::handle_webhook;

/// Health check.
pub async fn root() -> &'static str {
    "rocketbot is running"
}

pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::any(handle_webhook))
        .with_state(state)
}
