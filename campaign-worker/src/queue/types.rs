//! Queue message types.
//!
//! There is a single message type on the wire: a [`CampaignJob`], which asks
//! the worker to deliver one campaign to its resolved recipient list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;

/// Queue name consumed by the delivery worker.
pub const CAMPAIGN_QUEUE: &str = "email_campaign";

/// Delayed-message exchange that holds jobs until their fire time.
pub const CAMPAIGN_EXCHANGE: &str = "email_campaign.delayed";

/// One recipient of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Recipient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Address with surrounding whitespace removed, or `None` when blank.
    pub fn address(&self) -> Option<&str> {
        let email = self.email.trim();
        (!email.is_empty()).then_some(email)
    }
}

/// Job payload stored in the campaign queue.
///
/// Field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignJob {
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub custom_link_base: Option<String>,
    pub template_id: String,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    pub campaign_id: CampaignId,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format_is_camel_case() {
        let job = CampaignJob {
            recipients: vec![Recipient::new("1", "Ana", "ana@example.com")],
            custom_link_base: None,
            template_id: "tpl-9".to_string(),
            schedule_time: None,
            campaign_id: CampaignId::from("c-42"),
            subject: "Weekend brunch".to_string(),
        };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["campaignId"], "c-42");
        assert_eq!(json["templateId"], "tpl-9");
        assert!(json["customLinkBase"].is_null());
        assert_eq!(json["recipients"][0]["email"], "ana@example.com");
    }

    #[test]
    fn test_job_deserialization_minimal() {
        let json = r#"{
            "recipients": [{"email": "bo@example.com"}],
            "templateId": "tpl-1",
            "campaignId": "c-1",
            "subject": "Hi"
        }"#;

        let job: CampaignJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.recipients[0].name, "");
        assert_eq!(job.custom_link_base, None);
        assert_eq!(job.schedule_time, None);
    }

    #[test]
    fn test_recipient_address_blank() {
        assert_eq!(Recipient::new("1", "", "   ").address(), None);
        assert_eq!(
            Recipient::new("1", "", " cy@example.com ").address(),
            Some("cy@example.com")
        );
    }
}
