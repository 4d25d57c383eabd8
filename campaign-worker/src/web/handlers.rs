//! Tracking endpoint handlers.

use axum::{
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::campaign::{CampaignId, TrackingEvent};
use crate::shortlink;

/// 1x1 transparent GIF served from the open-tracking route.
pub static TRANSPARENT_PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn pixel_response() -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "image/png"),
            (CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        &TRANSPARENT_PIXEL[..],
    )
        .into_response()
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// Open-tracking pixel.
///
/// Appends an open event to the campaign and returns the pixel regardless
/// of whether the campaign exists or the write succeeded.
pub async fn track_open(
    State(state): State<AppState>,
    Path((campaign_id, email)): Path<(String, String)>,
) -> Response {
    let email = email.trim();
    if campaign_id.trim().is_empty() || email.is_empty() {
        debug!("open_tracking_missing_params");
        return pixel_response();
    }

    let campaign_id = CampaignId::from(campaign_id);
    let event = TrackingEvent::now(email);

    match state.db.campaigns().push_open(&campaign_id, &event).await {
        Ok(true) => info!(campaign_id = %campaign_id, recipient = %email, "open_recorded"),
        Ok(false) => warn!(campaign_id = %campaign_id, "open_for_unknown_campaign"),
        Err(e) => error!(campaign_id = %campaign_id, error = %e, "open_record_failed"),
    }

    pixel_response()
}

/// Click tracking redirect.
///
/// A resolvable code redirects to its destination after the click is
/// appended to the owning campaign. Anything unresolvable redirects to the
/// fallback URL without recording an event.
pub async fn track_click(
    State(state): State<AppState>,
    Path((code, email)): Path<(String, String)>,
) -> Response {
    let email = email.trim();
    if email.is_empty() {
        debug!(code = %code, "click_tracking_missing_email");
        return redirect(&state.fallback_url);
    }

    let link = match shortlink::resolve(state.db.short_links(), code.trim()).await {
        Ok(Some(link)) => link,
        Ok(None) => {
            warn!(code = %code, "click_for_unknown_code");
            return redirect(&state.fallback_url);
        }
        Err(e) => {
            error!(code = %code, error = %e, "short_link_lookup_failed");
            return redirect(&state.fallback_url);
        }
    };

    let event = TrackingEvent::now(email);
    match state.db.campaigns().push_click(&link.campaign_id, &event).await {
        Ok(true) => info!(
            campaign_id = %link.campaign_id,
            code = %link.code,
            recipient = %email,
            "click_recorded"
        ),
        Ok(false) => warn!(campaign_id = %link.campaign_id, "click_for_unknown_campaign"),
        Err(e) => error!(campaign_id = %link.campaign_id, error = %e, "click_record_failed"),
    }

    redirect(&link.destination)
}

/// Click URLs missing the code or the recipient.
pub async fn click_fallback(State(state): State<AppState>) -> Response {
    debug!("click_tracking_missing_params");
    redirect(&state.fallback_url)
}
