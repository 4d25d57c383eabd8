//! Durable, delay-aware campaign job queue.
//!
//! This module provides:
//! - The [`JobQueue`] handle shared by campaign creation (producer) and the
//!   delivery worker (consumer)
//! - A RabbitMQ implementation backed by a delayed-message exchange
//! - A process-local implementation used for embedded runs and tests
//!
//! ## Architecture
//!
//! ```text
//! create_campaign → enqueue(job, fire_at) → email_campaign.delayed → email_campaign → Worker
//! ```
//!
//! A dequeued job stays claimed until [`ClaimedJob::complete`] is called.
//! Unacknowledged jobs are redelivered (at-least-once).

pub mod memory;
pub mod rabbit;
pub mod types;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryQueue;
pub use rabbit::RabbitQueue;
pub use types::{CampaignJob, Recipient, CAMPAIGN_EXCHANGE, CAMPAIGN_QUEUE};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store a job, eligible for consumption no earlier than `fire_at`.
    async fn enqueue(&self, job: &CampaignJob, fire_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Wait for the next eligible job. `None` means the queue is closed.
    async fn dequeue(&self) -> Result<Option<ClaimedJob>>;
}

/// Transport-specific acknowledgement for a claimed job.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A job handed to exactly one consumer.
pub struct ClaimedJob {
    pub job: CampaignJob,
    ack: Box<dyn Acknowledge>,
}

impl ClaimedJob {
    pub fn new(job: CampaignJob, ack: Box<dyn Acknowledge>) -> Self {
        Self { job, ack }
    }

    /// Permanently remove the job from the queue.
    pub async fn complete(self) -> Result<()> {
        self.ack.ack().await
    }
}

/// Delay until `fire_at`, measured from `now`. Past fire times yield zero.
pub fn delay_until(fire_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    fire_at
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
