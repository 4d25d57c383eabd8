//! Campaign creation: resolve, persist, link and enqueue.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use super::{Campaign, TargetType};
use crate::links::click_link_base;
use crate::queue::{CampaignJob, JobQueue, Recipient};
use crate::shortlink::{self, DEFAULT_CODE_LENGTH};
use crate::store::{Database, StoreError};
use crate::targets::{resolve_recipients, ResolveError};

/// An administrator's request to start a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub subject: String,
    pub template_id: String,
    pub target: TargetType,
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Destination for the email's call-to-action link.
    #[serde(default)]
    pub custom_link: Option<String>,
    #[serde(default)]
    pub recipient_file_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreationSettings {
    pub public_base_url: String,
    pub short_code_length: usize,
}

impl Default for CreationSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080".to_string(),
            short_code_length: DEFAULT_CODE_LENGTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to enqueue campaign job: {0:#}")]
    Queue(anyhow::Error),
}

/// Create a campaign and schedule its delivery.
///
/// Recipients are resolved before anything is written, so a resolution
/// failure leaves no campaign behind and enqueues nothing. A failure after
/// the campaign is stored marks it `failed`.
pub async fn create_campaign(
    db: &dyn Database,
    queue: &dyn JobQueue,
    http: &Client,
    settings: &CreationSettings,
    request: NewCampaign,
) -> Result<Campaign, CreateError> {
    let recipients = resolve_recipients(
        db.recipients(),
        http,
        request.target,
        request.recipient_file_url.as_deref(),
    )
    .await?;

    let campaign = Campaign::from_request(&request);
    db.campaigns().insert_campaign(&campaign).await?;

    let job = match schedule(db, queue, settings, &campaign, recipients).await {
        Ok(job) => job,
        Err(e) => {
            // No job exists, so nothing else would ever finish this campaign.
            error!(campaign_id = %campaign.id, error = %e, "campaign_schedule_failed");
            if let Err(mark_err) = db.campaigns().mark_failed(&campaign.id, &e.to_string()).await {
                error!(
                    campaign_id = %campaign.id,
                    error = %mark_err,
                    "campaign_failure_write_failed"
                );
            }
            return Err(e);
        }
    };

    info!(
        campaign_id = %campaign.id,
        target = ?campaign.target,
        recipients = job.recipients.len(),
        scheduled = campaign.scheduled_time.is_some(),
        "campaign_created"
    );

    Ok(campaign)
}

/// Register the click short link, if any, and enqueue the delivery job.
async fn schedule(
    db: &dyn Database,
    queue: &dyn JobQueue,
    settings: &CreationSettings,
    campaign: &Campaign,
    recipients: Vec<Recipient>,
) -> Result<CampaignJob, CreateError> {
    let custom_link_base = match campaign.custom_link.as_deref().map(str::trim) {
        Some(destination) if !destination.is_empty() => {
            let link = shortlink::register(
                db.short_links(),
                destination,
                &campaign.id,
                settings.short_code_length,
            )
            .await?;
            Some(click_link_base(&settings.public_base_url, &link.code))
        }
        _ => None,
    };

    let job = CampaignJob {
        recipients,
        custom_link_base,
        template_id: campaign.template_id.clone(),
        schedule_time: campaign.scheduled_time,
        campaign_id: campaign.id.clone(),
        subject: campaign.subject.clone(),
    };

    queue
        .enqueue(&job, job.schedule_time)
        .await
        .map_err(CreateError::Queue)?;

    Ok(job)
}
