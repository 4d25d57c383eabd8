//! In-memory store for embedded runs and tests.
//!
//! Each operation takes the collection lock once, which gives the same
//! per-document atomicity the Mongo operators provide.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    CampaignStore, Database, DeliverySummary, RecipientDirectory, ShortLinkStore, StoreError,
    TemplateStore,
};
use crate::campaign::{Campaign, CampaignId, CampaignStatus, TrackingEvent};
use crate::queue::Recipient;
use crate::shortlink::ShortLink;
use crate::targets::Segment;
use crate::template::Template;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    campaigns: MemoryCampaigns,
    templates: MemoryTemplates,
    short_links: MemoryShortLinks,
    directory: MemoryDirectory,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, template: Template) {
        lock(&self.templates.0).insert(template.id.clone(), template);
    }

    /// Add a stored user/admin/waitlist record.
    pub fn add_recipient(&self, segment: Segment, recipient: Recipient, active: bool) {
        lock(&self.directory.0)
            .entry(segment)
            .or_default()
            .push((recipient, active));
    }

    /// Snapshot of a campaign, for assertions.
    pub fn campaign(&self, id: &CampaignId) -> Option<Campaign> {
        lock(&self.campaigns.0).get(id).cloned()
    }

    pub fn campaign_ids(&self) -> Vec<CampaignId> {
        lock(&self.campaigns.0).keys().cloned().collect()
    }

    pub fn campaign_count(&self) -> usize {
        lock(&self.campaigns.0).len()
    }

    pub fn short_link_count(&self) -> usize {
        lock(&self.short_links.0).len()
    }
}

impl Database for MemoryDatabase {
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

#[derive(Debug, Default)]
struct MemoryCampaigns(Mutex<HashMap<CampaignId, Campaign>>);

impl MemoryCampaigns {
    /// Apply `update` to a campaign matching `filter`; `false` if none matched.
    fn update_where(
        &self,
        id: &CampaignId,
        filter: impl FnOnce(&Campaign) -> bool,
        update: impl FnOnce(&mut Campaign),
    ) -> bool {
        let mut campaigns = lock(&self.0);
        match campaigns.get_mut(id) {
            Some(campaign) if filter(campaign) => {
                update(campaign);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaigns {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let mut campaigns = lock(&self.0);
        if campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Duplicate);
        }
        campaigns.insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, StoreError> {
        Ok(lock(&self.0).get(id).cloned())
    }

    async fn push_open(&self, id: &CampaignId, event: &TrackingEvent) -> Result<bool, StoreError> {
        Ok(self.update_where(
            id,
            |_| true,
            |campaign| campaign.statistics.opens.push(event.clone()),
        ))
    }

    async fn push_click(
        &self,
        id: &CampaignId,
        event: &TrackingEvent,
    ) -> Result<bool, StoreError> {
        Ok(self.update_where(
            id,
            |_| true,
            |campaign| campaign.statistics.clicks.push(event.clone()),
        ))
    }

    async fn mark_success(
        &self,
        id: &CampaignId,
        summary: &DeliverySummary,
    ) -> Result<bool, StoreError> {
        Ok(self.update_where(
            id,
            |campaign| campaign.status == CampaignStatus::Processing,
            |campaign| {
                campaign.status = CampaignStatus::Success;
                campaign.statistics.sent = summary.sent;
                campaign.statistics.delivered = summary.delivered;
                campaign.report_url = Some(summary.report_url.clone());
                campaign.updated_at = Utc::now();
            },
        ))
    }

    async fn mark_failed(&self, id: &CampaignId, message: &str) -> Result<bool, StoreError> {
        Ok(self.update_where(
            id,
            |campaign| campaign.status == CampaignStatus::Processing,
            |campaign| {
                campaign.status = CampaignStatus::Failed;
                campaign.error_message = Some(message.to_string());
                campaign.updated_at = Utc::now();
            },
        ))
    }
}

#[derive(Debug, Default)]
struct MemoryTemplates(Mutex<HashMap<String, Template>>);

#[async_trait]
impl TemplateStore for MemoryTemplates {
    async fn fetch_template(&self, id: &str) -> Result<Option<Template>, StoreError> {
        Ok(lock(&self.0).get(id).cloned())
    }
}

#[derive(Debug, Default)]
struct MemoryShortLinks(Mutex<HashMap<String, ShortLink>>);

#[async_trait]
impl ShortLinkStore for MemoryShortLinks {
    async fn insert_short_link(&self, link: &ShortLink) -> Result<(), StoreError> {
        let mut links = lock(&self.0);
        if links.contains_key(&link.code) {
            return Err(StoreError::Duplicate);
        }
        links.insert(link.code.clone(), link.clone());
        Ok(())
    }

    async fn fetch_short_link(&self, code: &str) -> Result<Option<ShortLink>, StoreError> {
        Ok(lock(&self.0).get(code).cloned())
    }
}

#[derive(Debug, Default)]
struct MemoryDirectory(Mutex<HashMap<Segment, Vec<(Recipient, bool)>>>);

#[async_trait]
impl RecipientDirectory for MemoryDirectory {
    async fn active_recipients(&self, segment: Segment) -> Result<Vec<Recipient>, StoreError> {
        let directory = lock(&self.0);
        Ok(directory
            .get(&segment)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, active)| *active)
                    .map(|(recipient, _)| recipient.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
