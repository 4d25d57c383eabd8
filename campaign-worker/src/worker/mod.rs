//! Campaign delivery worker.
//!
//! The worker consumes one job at a time from the [`JobQueue`], runs the
//! delivery pipeline for it and acknowledges the job once the campaign has
//! reached a terminal status. A job is only acknowledged after its outcome
//! has been written, so a crash mid-delivery leaves it claimable again.

pub mod pipeline;
pub mod report;
pub mod throttle;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{error, info, warn};

use crate::blob::BlobStorage;
use crate::mailer::Mailer;
use crate::queue::{ClaimedJob, JobQueue};
use crate::store::Database;

pub use pipeline::{deliver, DeliveryOutcome, PipelineError};
pub use throttle::Throttle;

/// Pause after a failed dequeue before asking the queue again.
const DEQUEUE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Base URL of the tracking server, used for pixel URLs.
    pub public_base_url: String,
    /// Directory for downloaded templates and report files.
    pub scratch_dir: PathBuf,
}

/// Shared capabilities handed to every delivery.
pub struct WorkerContext {
    pub db: Arc<dyn Database>,
    pub mailer: Arc<dyn Mailer>,
    pub blobs: Arc<dyn BlobStorage>,
    pub http: Client,
    pub throttle: Arc<Throttle>,
    pub settings: DeliverySettings,
}

/// Consume jobs until `shutdown` resolves or the queue closes.
pub async fn run(
    ctx: Arc<WorkerContext>,
    queue: Arc<dyn JobQueue>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    info!("worker_ready");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            claimed = queue.dequeue() => {
                match claimed {
                    Ok(Some(claimed)) => {
                        process(&ctx, claimed).await;
                    }
                    Ok(None) => {
                        warn!("queue_closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "queue_dequeue_failed");
                        tokio::select! {
                            _ = &mut shutdown => {
                                info!("worker_stopping");
                                break;
                            }
                            _ = tokio::time::sleep(DEQUEUE_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
    }

    info!("worker_shutdown_complete");
}

/// Deliver one claimed job and acknowledge it.
///
/// The pipeline runs on its own task so a panic inside it is observed here
/// and recorded as a failure instead of taking the worker down.
pub async fn process(ctx: &Arc<WorkerContext>, claimed: ClaimedJob) -> DeliveryOutcome {
    let campaign_id = claimed.job.campaign_id.clone();
    info!(
        campaign_id = %campaign_id,
        recipients = claimed.job.recipients.len(),
        "campaign_job_received"
    );

    let task = {
        let ctx = Arc::clone(ctx);
        let job = claimed.job.clone();
        tokio::spawn(async move { deliver(&ctx, &job).await })
    };

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = if e.is_panic() {
                "delivery task panicked".to_string()
            } else {
                format!("delivery task aborted: {}", e)
            };
            pipeline::record_failure(ctx, &campaign_id, &message).await
        }
    };

    match claimed.complete().await {
        Ok(()) => info!(campaign_id = %campaign_id, "campaign_job_completed"),
        Err(e) => error!(
            campaign_id = %campaign_id,
            error = %format!("{:#}", e),
            "campaign_job_ack_failed"
        ),
    }

    outcome
}
