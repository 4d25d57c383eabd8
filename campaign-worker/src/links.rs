//! Tracking URL construction.
//!
//! The worker embeds these URLs in outgoing mail and the web server routes
//! them back to the tracking handlers, so both sides share the layouts here.

use url::Url;

use crate::campaign::CampaignId;

/// Route serving the open-tracking pixel.
pub const OPEN_ROUTE: &str = "/email-campaign/track/open/:campaign_id/:email/image.png";

/// Route recording a click and redirecting to the destination.
pub const CLICK_ROUTE: &str = "/email-campaign/track/click/:code/:email";

/// Append percent-encoded path segments to `base`.
///
/// Falls back to plain string joining if `base` is not an absolute URL.
pub fn append_path_segments(base: &str, segments: &[&str]) -> String {
    match Url::parse(base) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url.to_string()
        }
        _ => join_plain(base, segments),
    }
}

fn join_plain(base: &str, segments: &[&str]) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    for segment in segments {
        joined.push('/');
        joined.push_str(segment);
    }
    joined
}

/// Per-recipient open pixel URL.
pub fn open_pixel_url(public_base: &str, campaign_id: &CampaignId, email: &str) -> String {
    append_path_segments(
        public_base,
        &[
            "email-campaign",
            "track",
            "open",
            campaign_id.as_str(),
            email,
            "image.png",
        ],
    )
}

/// Click-link base stored on the job for a short code.
pub fn click_link_base(public_base: &str, code: &str) -> String {
    append_path_segments(public_base, &["email-campaign", "track", "click", code])
}

/// Per-recipient redirect link built from the job's link base.
pub fn click_link(link_base: &str, email: &str) -> String {
    append_path_segments(link_base, &[email])
}
