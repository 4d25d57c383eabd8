//! Tracking web server.
//!
//! This module provides the inbound side of campaign tracking:
//! - An open-pixel endpoint that records an open and always returns the pixel
//! - A click endpoint that records a click and redirects to the destination
//!
//! Tracking never fails visibly. Store errors are logged and the requester
//! receives the same response it would have received on success.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::links::{CLICK_ROUTE, OPEN_ROUTE};
use crate::store::Database;

pub use handlers::{
    click_fallback, health, track_click, track_open, HealthResponse, TRANSPARENT_PIXEL,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    /// Redirect target when a click cannot be resolved.
    pub fallback_url: Arc<str>,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, fallback_url: impl Into<Arc<str>>) -> Self {
        Self {
            db,
            fallback_url: fallback_url.into(),
        }
    }
}

/// Build the tracking router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(OPEN_ROUTE, get(track_open))
        .route(CLICK_ROUTE, get(track_click))
        .route("/email-campaign/track/click/:code", get(click_fallback))
        .route("/email-campaign/track/click", get(click_fallback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
