//! Document-store seams used by the pipeline.
//!
//! Every mutation of a campaign is a single-document atomic update: tracking
//! requests `$push` onto the statistics arrays and the worker's terminal write
//! is a `$set` guarded on `status == processing`. No read-modify-write cycle
//! exists anywhere, so concurrent writers never overwrite each other's events.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use thiserror::Error;

use crate::campaign::{Campaign, CampaignId, TrackingEvent};
use crate::queue::Recipient;
use crate::shortlink::ShortLink;
use crate::targets::Segment;
use crate::template::Template;

pub use memory::MemoryDatabase;
pub use mongo::MongoDatabase;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database call failed: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("failed to serialize to bson: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),
    #[error("a document with this key already exists")]
    Duplicate,
}

/// Terminal fields written once the send loop has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySummary {
    pub sent: u64,
    pub delivered: u64,
    pub report_url: String,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError>;

    async fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, StoreError>;

    /// Append an open event. Returns `false` when no such campaign exists.
    async fn push_open(&self, id: &CampaignId, event: &TrackingEvent) -> Result<bool, StoreError>;

    /// Append a click event. Returns `false` when no such campaign exists.
    async fn push_click(&self, id: &CampaignId, event: &TrackingEvent)
        -> Result<bool, StoreError>;

    /// Move a `processing` campaign to `success`.
    ///
    /// Returns `false` when the campaign is missing or already terminal.
    async fn mark_success(
        &self,
        id: &CampaignId,
        summary: &DeliverySummary,
    ) -> Result<bool, StoreError>;

    /// Move a `processing` campaign to `failed` with an error message.
    ///
    /// Returns `false` when the campaign is missing or already terminal.
    async fn mark_failed(&self, id: &CampaignId, message: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn fetch_template(&self, id: &str) -> Result<Option<Template>, StoreError>;
}

#[async_trait]
pub trait ShortLinkStore: Send + Sync {
    /// Insert a new mapping; fails with [`StoreError::Duplicate`] if the code is taken.
    async fn insert_short_link(&self, link: &ShortLink) -> Result<(), StoreError>;

    async fn fetch_short_link(&self, code: &str) -> Result<Option<ShortLink>, StoreError>;
}

/// Read-only view over the stored user segments.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn active_recipients(&self, segment: Segment) -> Result<Vec<Recipient>, StoreError>;
}

pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
    fn templates(&self) -> &dyn TemplateStore;
    fn short_links(&self) -> &dyn ShortLinkStore;
    fn recipients(&self) -> &dyn RecipientDirectory;
}
