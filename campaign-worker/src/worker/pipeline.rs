//! Delivery pipeline for a single campaign job.
//!
//! The pipeline always leaves the campaign terminal: every fatal error is
//! recorded as `failed` with its message, and a completed send loop is
//! recorded as `success` with the delivery counts and report URL.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::report::{render_csv, LogEntry};
use super::WorkerContext;
use crate::blob::BlobMetadata;
use crate::campaign::{CampaignId, CampaignStatus};
use crate::links::{click_link, open_pixel_url};
use crate::mailer::SendRequest;
use crate::queue::CampaignJob;
use crate::store::{DeliverySummary, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("template not found")]
    TemplateNotFound,
    #[error("failed to fetch template: {0}")]
    TemplateFetch(#[from] reqwest::Error),
    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),
    #[error("failed to upload report: {0:#}")]
    Upload(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a job ended, as seen by the consumption loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Succeeded(DeliverySummary),
    Failed(String),
    /// The campaign was missing or already terminal; nothing was sent.
    Skipped,
}

/// Files written during a run.
///
/// Removed when the guard is dropped, which also covers a panicking run.
#[derive(Debug, Default)]
struct ScratchFiles(Vec<PathBuf>);

impl ScratchFiles {
    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.0.push(path.clone());
        path
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in self.0.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "scratch_file_removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "scratch_file_remove_failed"),
            }
        }
    }
}

/// Execute the full send pipeline for one job.
pub async fn deliver(ctx: &WorkerContext, job: &CampaignJob) -> DeliveryOutcome {
    let campaign_id = &job.campaign_id;

    match ctx.db.campaigns().fetch_campaign(campaign_id).await {
        Ok(Some(campaign)) if campaign.status == CampaignStatus::Processing => {}
        Ok(Some(campaign)) => {
            warn!(
                campaign_id = %campaign_id,
                status = campaign.status.as_str(),
                "delivery_skipped_terminal_campaign"
            );
            return DeliveryOutcome::Skipped;
        }
        Ok(None) => {
            warn!(campaign_id = %campaign_id, "delivery_skipped_missing_campaign");
            return DeliveryOutcome::Skipped;
        }
        Err(e) => return record_failure(ctx, campaign_id, &e.to_string()).await,
    }

    let result = {
        let mut scratch = ScratchFiles::default();
        run(ctx, job, &mut scratch).await
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => return record_failure(ctx, campaign_id, &e.to_string()).await,
    };

    match ctx.db.campaigns().mark_success(campaign_id, &summary).await {
        Ok(true) => {
            info!(
                campaign_id = %campaign_id,
                sent = summary.sent,
                delivered = summary.delivered,
                report_url = %summary.report_url,
                "campaign_delivery_succeeded"
            );
            DeliveryOutcome::Succeeded(summary)
        }
        Ok(false) => {
            warn!(campaign_id = %campaign_id, "campaign_no_longer_processing");
            DeliveryOutcome::Skipped
        }
        Err(e) => record_failure(ctx, campaign_id, &e.to_string()).await,
    }
}

/// Write `failed` with `message` onto the campaign.
pub(crate) async fn record_failure(
    ctx: &WorkerContext,
    campaign_id: &CampaignId,
    message: &str,
) -> DeliveryOutcome {
    error!(campaign_id = %campaign_id, error = %message, "campaign_delivery_failed");

    match ctx.db.campaigns().mark_failed(campaign_id, message).await {
        Ok(true) => {}
        Ok(false) => warn!(campaign_id = %campaign_id, "campaign_no_longer_processing"),
        Err(e) => error!(campaign_id = %campaign_id, error = %e, "campaign_failure_write_failed"),
    }

    DeliveryOutcome::Failed(message.to_string())
}

async fn run(
    ctx: &WorkerContext,
    job: &CampaignJob,
    scratch: &mut ScratchFiles,
) -> Result<DeliverySummary, PipelineError> {
    let campaign_id = &job.campaign_id;
    let scratch_dir = &ctx.settings.scratch_dir;

    let template = ctx
        .db
        .templates()
        .fetch_template(&job.template_id)
        .await?
        .ok_or(PipelineError::TemplateNotFound)?;

    let body = ctx
        .http
        .get(&template.url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    tokio::fs::create_dir_all(scratch_dir).await?;
    let template_path =
        scratch.track(scratch_dir.join(format!("{}-{}", campaign_id, template.scratch_name())));
    tokio::fs::write(&template_path, &body).await?;

    info!(
        campaign_id = %campaign_id,
        template_id = %template.id,
        template_length = body.len(),
        recipients = job.recipients.len(),
        "campaign_template_ready"
    );

    let mut log = Vec::with_capacity(job.recipients.len());
    let mut delivered: u64 = 0;

    for recipient in &job.recipients {
        let Some(email) = recipient.address() else {
            debug!(
                campaign_id = %campaign_id,
                recipient_id = %recipient.id,
                "recipient_skipped_no_address"
            );
            continue;
        };

        ctx.throttle.acquire().await;

        let request = SendRequest {
            to: email.to_string(),
            template_path: template_path.clone(),
            display_name: recipient.name.clone(),
            subject: job.subject.clone(),
            action_link: job
                .custom_link_base
                .as_deref()
                .map(|base| click_link(base, email)),
            campaign_id: campaign_id.clone(),
            tracking_pixel_url: open_pixel_url(&ctx.settings.public_base_url, campaign_id, email),
        };

        let outcome = ctx.mailer.send(&request).await;
        if outcome.success {
            delivered += 1;
            log.push(LogEntry::sent(email));
        } else {
            let error = outcome
                .error
                .unwrap_or_else(|| "unknown send error".to_string());
            warn!(
                campaign_id = %campaign_id,
                recipient = %email,
                error = %error,
                "recipient_send_failed"
            );
            log.push(LogEntry::failed(email, error));
        }
    }

    let report_path = scratch.track(scratch_dir.join(format!("{}-report.csv", campaign_id)));
    tokio::fs::write(&report_path, render_csv(&log)).await?;

    let metadata = BlobMetadata {
        key: format!(
            "campaign-reports/{}-{}.csv",
            campaign_id,
            Utc::now().timestamp_millis()
        ),
        content_type: "text/csv".to_string(),
    };
    let uploaded = ctx
        .blobs
        .upload(&report_path, &metadata)
        .await
        .map_err(PipelineError::Upload)?;

    Ok(DeliverySummary {
        sent: job.recipients.len() as u64,
        delivered,
        report_url: uploaded.url,
    })
}
