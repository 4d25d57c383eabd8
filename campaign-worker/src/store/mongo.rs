//! MongoDB implementation of the store seams.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::{Client, Collection, Database as MongoDb};
use serde::Deserialize;
use tracing::info;

use super::{
    CampaignStore, Database, DeliverySummary, RecipientDirectory, ShortLinkStore, StoreError,
    TemplateStore,
};
use crate::campaign::{Campaign, CampaignId, CampaignStatus, TrackingEvent};
use crate::queue::Recipient;
use crate::shortlink::ShortLink;
use crate::targets::Segment;
use crate::template::Template;

const DUPLICATE_KEY: i32 = 11000;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoTemplateStore = Collection<Template>;
pub type MongoShortLinkStore = Collection<ShortLink>;

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: Collection<Campaign>,
    templates: Collection<Template>,
    short_links: Collection<ShortLink>,
    directory: MongoDirectory,
}

impl MongoDatabase {
    pub fn new(db: MongoDb) -> MongoDatabase {
        MongoDatabase {
            campaigns: db.collection("email_campaigns"),
            templates: db.collection("email_templates"),
            short_links: db.collection("short_links"),
            directory: MongoDirectory {
                users: db.collection("users"),
                admins: db.collection("admins"),
                waitlist: db.collection("waitlist"),
            },
        }
    }

    /// Connect and verify the server is reachable.
    pub async fn connect(uri: &str, database: &str) -> Result<MongoDatabase, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }, None).await?;
        info!(database = database, "mongodb_connected");
        Ok(MongoDatabase::new(db))
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn templates(&self) -> &dyn TemplateStore {
        &self.templates
    }

    fn short_links(&self) -> &dyn ShortLinkStore {
        &self.short_links
    }

    fn recipients(&self) -> &dyn RecipientDirectory {
        &self.directory
    }
}

fn is_duplicate_key(error: &MongoError) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn processing_filter(id: &CampaignId) -> Document {
    doc! { "_id": id.as_str(), "status": CampaignStatus::Processing.as_str() }
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        self.insert_one(campaign, None).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, StoreError> {
        let campaign = self.find_one(doc! { "_id": id.as_str() }, None).await?;
        Ok(campaign)
    }

    async fn push_open(&self, id: &CampaignId, event: &TrackingEvent) -> Result<bool, StoreError> {
        let result = self
            .update_one(
                doc! { "_id": id.as_str() },
                doc! { "$push": { "statistics.opens": bson::to_bson(event)? } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn push_click(
        &self,
        id: &CampaignId,
        event: &TrackingEvent,
    ) -> Result<bool, StoreError> {
        let result = self
            .update_one(
                doc! { "_id": id.as_str() },
                doc! { "$push": { "statistics.clicks": bson::to_bson(event)? } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    #[tracing::instrument(skip(self, summary))]
    async fn mark_success(
        &self,
        id: &CampaignId,
        summary: &DeliverySummary,
    ) -> Result<bool, StoreError> {
        let sent = i64::try_from(summary.sent).unwrap_or(i64::MAX);
        let delivered = i64::try_from(summary.delivered).unwrap_or(i64::MAX);
        let result = self
            .update_one(
                processing_filter(id),
                doc! {
                    "$set": {
                        "status": CampaignStatus::Success.as_str(),
                        "statistics.sent": sent,
                        "statistics.delivered": delivered,
                        "report_url": summary.report_url.as_str(),
                        "updated_at": bson::DateTime::from_chrono(Utc::now()),
                    }
                },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(&self, id: &CampaignId, message: &str) -> Result<bool, StoreError> {
        let result = self
            .update_one(
                processing_filter(id),
                doc! {
                    "$set": {
                        "status": CampaignStatus::Failed.as_str(),
                        "error_message": message,
                        "updated_at": bson::DateTime::from_chrono(Utc::now()),
                    }
                },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }
}

#[async_trait]
impl TemplateStore for MongoTemplateStore {
    #[tracing::instrument(skip(self))]
    async fn fetch_template(&self, id: &str) -> Result<Option<Template>, StoreError> {
        let template = self.find_one(doc! { "_id": id }, None).await?;
        Ok(template)
    }
}

#[async_trait]
impl ShortLinkStore for MongoShortLinkStore {
    // The code is the document `_id`, so uniqueness comes from the primary key.
    async fn insert_short_link(&self, link: &ShortLink) -> Result<(), StoreError> {
        match self.insert_one(link, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_short_link(&self, code: &str) -> Result<Option<ShortLink>, StoreError> {
        let link = self.find_one(doc! { "_id": code }, None).await?;
        Ok(link)
    }
}

/// Projection of a user, admin or waitlist document.
#[derive(Debug, Clone, Deserialize)]
struct DirectoryEntry {
    #[serde(rename = "_id")]
    id: Bson,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

impl DirectoryEntry {
    fn into_recipient(self) -> Recipient {
        let id = match self.id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s,
            other => other.to_string(),
        };
        Recipient::new(id, self.name, self.email)
    }
}

#[derive(Debug, Clone)]
struct MongoDirectory {
    users: Collection<DirectoryEntry>,
    admins: Collection<DirectoryEntry>,
    waitlist: Collection<DirectoryEntry>,
}

#[async_trait]
impl RecipientDirectory for MongoDirectory {
    #[tracing::instrument(skip(self))]
    async fn active_recipients(&self, segment: Segment) -> Result<Vec<Recipient>, StoreError> {
        let collection = match segment {
            Segment::Users => &self.users,
            Segment::Admins => &self.admins,
            Segment::Waitlist => &self.waitlist,
        };

        let options = FindOptions::builder()
            .projection(doc! { "name": 1, "email": 1 })
            .build();

        let entries: Vec<DirectoryEntry> = collection
            .find(doc! { "active": true }, options)
            .await?
            .try_collect()
            .await?;

        Ok(entries
            .into_iter()
            .map(DirectoryEntry::into_recipient)
            .collect())
    }
}
