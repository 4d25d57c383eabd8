//! Short-link mapping for click attribution.
//!
//! A campaign with a custom destination gets one opaque code at creation
//! time. Click URLs embed the code instead of the destination so that every
//! click passes through the tracking endpoint first.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::campaign::CampaignId;
use crate::store::{ShortLinkStore, StoreError};

/// Default number of characters in a generated code.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Attempts before giving up on finding an unused code.
const MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLink {
    #[serde(rename = "_id")]
    pub code: String,
    pub destination: String,
    pub campaign_id: CampaignId,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Generate a random base62 code.
pub fn generate_code(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length.max(1))
        .map(char::from)
        .collect()
}

/// Create and persist a new short link for a campaign.
///
/// Codes are never reused: a collision with an existing code draws a new one.
#[tracing::instrument(skip(store))]
pub async fn register(
    store: &dyn ShortLinkStore,
    destination: &str,
    campaign_id: &CampaignId,
    code_length: usize,
) -> Result<ShortLink, StoreError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let link = ShortLink {
            code: generate_code(code_length),
            destination: destination.to_string(),
            campaign_id: campaign_id.clone(),
            created_at: Utc::now(),
        };

        match store.insert_short_link(&link).await {
            Ok(()) => {
                info!(code = %link.code, campaign_id = %campaign_id, "short_link_registered");
                return Ok(link);
            }
            Err(StoreError::Duplicate) => {
                warn!(attempt = attempt, "short_link_code_collision");
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::Duplicate)
}

/// Look up the destination for a code.
pub async fn resolve(
    store: &dyn ShortLinkStore,
    code: &str,
) -> Result<Option<ShortLink>, StoreError> {
    if code.trim().is_empty() {
        return Ok(None);
    }
    store.fetch_short_link(code).await
}
