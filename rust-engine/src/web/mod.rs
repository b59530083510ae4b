//! Capture/tracking web server.
//!
//! Thin collaborators in front of the aggregator: every endpoint either
//! translates a request into one event and returns immediately, or serves
//! a fixed response. Stats are never touched here.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::{
    capture, event_webhook, health, pixel, track_click, AppState, EventSubmission,
    HealthResponse, WebhookResponse,
};

/// Build the capture/tracking router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/capture", post(capture))
        .route("/track/:campaign", get(track_click))
        .route("/pixel/:token", get(pixel))
        .route("/events", post(event_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
