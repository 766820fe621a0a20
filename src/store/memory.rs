//! In-memory store backend. Primary use is tests and single-instance dev
//! runs; production points the traits at the real remote store.

use super::*;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct QueueEntry {
    campaign: Campaign,
    recipients: Vec<CampaignRecipient>,
    messages: HashMap<String, (MessageStatus, Option<String>)>,
}

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<HashMap<String, ProfileRecord>>,
    campaigns: Mutex<HashMap<String, QueueEntry>>,
    /// Insertion order, used to break created-at ties deterministically.
    campaign_order: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a campaign with its recipient rows.
    pub async fn insert_campaign(&self, campaign: Campaign, recipients: Vec<CampaignRecipient>) {
        let id = campaign.id.clone();
        self.campaigns.lock().await.insert(
            id.clone(),
            QueueEntry {
                campaign,
                recipients,
                messages: HashMap::new(),
            },
        );
        self.campaign_order.lock().await.push(id);
    }

    pub async fn campaign(&self, campaign_id: &str) -> Option<Campaign> {
        self.campaigns
            .lock()
            .await
            .get(campaign_id)
            .map(|e| e.campaign.clone())
    }

    pub async fn message_status(
        &self,
        campaign_id: &str,
        phone: &str,
    ) -> Option<(MessageStatus, Option<String>)> {
        self.campaigns
            .lock()
            .await
            .get(campaign_id)
            .and_then(|e| e.messages.get(phone).cloned())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn load_profile(&self, user_id: &str) -> Result<ProfileRecord, StoreError> {
        Ok(self
            .profiles
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn swap_lock(
        &self,
        user_id: &str,
        expected_owner: Option<&str>,
        new: Option<LockRecord>,
    ) -> Result<bool, StoreError> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles.entry(user_id.to_string()).or_default();
        let current_owner = profile.lock.as_ref().map(|l| l.owner_instance_id.as_str());
        if current_owner != expected_owner {
            return Ok(false);
        }
        profile.lock = new;
        Ok(true)
    }

    async fn set_linked(&self, user_id: &str, linked: bool) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        profiles.entry(user_id.to_string()).or_default().linked = linked;
        Ok(())
    }

    async fn set_status(
        &self,
        user_id: &str,
        status: ProfileStatus,
        qr_challenge: Option<String>,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        let profile = profiles.entry(user_id.to_string()).or_default();
        profile.status = status;
        profile.qr_challenge = qr_challenge;
        Ok(())
    }

    async fn load_credentials(
        &self,
        user_id: &str,
    ) -> Result<Option<CredentialBundle>, StoreError> {
        Ok(self
            .profiles
            .lock()
            .await
            .get(user_id)
            .and_then(|p| p.credentials.clone()))
    }

    async fn store_credentials(
        &self,
        user_id: &str,
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        profiles.entry(user_id.to_string()).or_default().credentials = Some(bundle.clone());
        Ok(())
    }

    async fn delete_credentials(&self, user_id: &str) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        if let Some(profile) = profiles.get_mut(user_id) {
            profile.credentials = None;
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignQueue for MemoryStore {
    async fn next_due(&self, now: DateTime<Utc>) -> Result<Option<Campaign>, StoreError> {
        let campaigns = self.campaigns.lock().await;
        let order = self.campaign_order.lock().await;

        // Manual queue jumps ahead of the schedule.
        for id in order.iter() {
            if let Some(entry) = campaigns.get(id)
                && entry.campaign.status == CampaignStatus::Queued
            {
                return Ok(Some(entry.campaign.clone()));
            }
        }
        for id in order.iter() {
            if let Some(entry) = campaigns.get(id)
                && entry.campaign.status == CampaignStatus::Scheduled
                && entry.campaign.scheduled_at.is_some_and(|at| at <= now)
            {
                return Ok(Some(entry.campaign.clone()));
            }
        }
        Ok(None)
    }

    async fn claim(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool, StoreError> {
        let mut campaigns = self.campaigns.lock().await;
        let entry = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::CampaignNotFound(campaign_id.to_string()))?;
        if !from.contains(&entry.campaign.status) {
            return Ok(false);
        }
        entry.campaign.status = to;
        Ok(true)
    }

    async fn recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>, StoreError> {
        let campaigns = self.campaigns.lock().await;
        let entry = campaigns
            .get(campaign_id)
            .ok_or_else(|| StoreError::CampaignNotFound(campaign_id.to_string()))?;
        Ok(entry.recipients.clone())
    }

    async fn record_message(
        &self,
        campaign_id: &str,
        phone: &str,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.lock().await;
        let entry = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::CampaignNotFound(campaign_id.to_string()))?;
        entry
            .messages
            .insert(phone.to_string(), (status, error.map(str::to_string)));
        Ok(())
    }

    async fn update_progress(
        &self,
        campaign_id: &str,
        sent_count: usize,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.lock().await;
        let entry = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::CampaignNotFound(campaign_id.to_string()))?;
        entry.campaign.sent_count = sent_count;
        entry.campaign.status = status;
        Ok(())
    }

    async fn record_error(&self, campaign_id: &str, error_log: &str) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.lock().await;
        let entry = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::CampaignNotFound(campaign_id.to_string()))?;
        entry.campaign.error_log = Some(error_log.to_string());
        Ok(())
    }
}
