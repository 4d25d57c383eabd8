//! Campaign records and their statistics.
//!
//! A campaign is created in `processing` and is moved exactly once into a
//! terminal status by the delivery worker. Tracking requests only ever touch
//! the `statistics.opens` / `statistics.clicks` arrays.

use std::fmt;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime as bson_datetime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod manager;

pub use manager::{create_campaign, CreateError, CreationSettings, NewCampaign};

/// Opaque campaign identity, stored as the document `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(String);

impl CampaignId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CampaignId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CampaignId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Processing,
    Success,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Processing => "processing",
            CampaignStatus::Success => "success",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignStatus::Processing)
    }
}

/// Recipient-selection strategy for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Users,
    Admins,
    Waitlist,
    UploadedFile,
}

/// A single open or click, attributed to a recipient address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub email: String,
    #[serde(with = "bson_datetime")]
    pub at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn now(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatistics {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub delivered: u64,
    #[serde(default)]
    pub opens: Vec<TrackingEvent>,
    #[serde(default)]
    pub clicks: Vec<TrackingEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub name: String,
    pub subject: String,
    pub template_id: String,
    pub target: TargetType,
    pub status: CampaignStatus,
    #[serde(default, with = "optional_bson_datetime")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_link: Option<String>,
    #[serde(default)]
    pub recipient_file_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub statistics: CampaignStatistics,
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(with = "bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Optional timestamps stored as BSON dates.
mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .map(bson::DateTime::from_chrono)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(bson::DateTime::to_chrono))
    }
}

impl Campaign {
    /// Build a fresh `processing` campaign from a creation request.
    pub fn from_request(request: &NewCampaign) -> Self {
        let now = Utc::now();
        Self {
            id: CampaignId::new(),
            name: request.name.clone(),
            subject: request.subject.clone(),
            template_id: request.template_id.clone(),
            target: request.target,
            status: CampaignStatus::Processing,
            scheduled_time: request.schedule_time,
            custom_link: request.custom_link.clone(),
            recipient_file_url: request.recipient_file_url.clone(),
            error_message: None,
            statistics: CampaignStatistics::default(),
            report_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc, Bson};

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CampaignStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(CampaignStatus::Failed.as_str(), "failed");
        assert!(CampaignStatus::Success.is_terminal());
        assert!(!CampaignStatus::Processing.is_terminal());
    }

    #[test]
    fn test_target_type_names() {
        let parsed: TargetType = serde_json::from_str("\"uploaded_file\"").unwrap();
        assert_eq!(parsed, TargetType::UploadedFile);
    }

    #[test]
    fn test_statistics_default_when_absent() {
        let stored = doc! {
            "_id": "c-1",
            "name": "Spring menu",
            "subject": "New dishes",
            "template_id": "tpl-1",
            "target": "users",
            "status": "processing",
            "created_at": bson::DateTime::now(),
            "updated_at": bson::DateTime::now(),
        };

        let campaign: Campaign = bson::from_document(stored).unwrap();
        assert_eq!(campaign.id.as_str(), "c-1");
        assert_eq!(campaign.statistics, CampaignStatistics::default());
        assert!(campaign.report_url.is_none());
        assert!(campaign.scheduled_time.is_none());
    }

    #[test]
    fn test_timestamps_stored_as_bson_dates() {
        let mut campaign = Campaign::from_request(&NewCampaign {
            name: "Spring menu".to_string(),
            subject: "New dishes".to_string(),
            template_id: "tpl-1".to_string(),
            target: TargetType::Users,
            schedule_time: Some(Utc::now()),
            custom_link: None,
            recipient_file_url: None,
        });
        campaign.statistics.opens.push(TrackingEvent::now("ivy@example.com"));

        let stored = bson::to_document(&campaign).unwrap();
        assert!(matches!(stored.get("created_at"), Some(Bson::DateTime(_))));
        assert!(matches!(stored.get("updated_at"), Some(Bson::DateTime(_))));
        assert!(matches!(stored.get("scheduled_time"), Some(Bson::DateTime(_))));
        let opens = stored.get_document("statistics").unwrap().get_array("opens").unwrap();
        let event = opens[0].as_document().unwrap();
        assert!(matches!(event.get("at"), Some(Bson::DateTime(_))));
    }
}
