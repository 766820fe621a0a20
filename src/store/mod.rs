//! Remote persistence seams.
//!
//! Cross-instance coordination happens exclusively through these records:
//! the per-user profile (linked flag, status, QR, lock, credential bundle)
//! and the campaign work queue. In-memory registry state never crosses an
//! instance boundary.

pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;

/// Opaque serialized identity/key material required to resume a session
/// without re-pairing. Created on first successful pairing, mirrored to the
/// remote store on every material update, deleted on logout/reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Own identity on the network once paired.
    pub jid: Option<String>,
    /// Key material as the protocol client serialized it.
    pub keys: serde_json::Value,
}

impl CredentialBundle {
    pub fn has_identity(&self) -> bool {
        self.jid.is_some()
    }
}

/// Remote ownership claim for one user's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner_instance_id: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    #[default]
    Unlinked,
    AwaitingScan,
    Linking,
    Linked,
}

/// The per-user profile record as persisted remotely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub linked: bool,
    pub status: ProfileStatus,
    pub qr_challenge: Option<String>,
    pub lock: Option<LockRecord>,
    pub credentials: Option<CredentialBundle>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> Result<ProfileRecord, StoreError>;

    /// Conditionally replaces the lock record: succeeds only if the current
    /// owner still matches `expected_owner` (optimistic concurrency).
    async fn swap_lock(
        &self,
        user_id: &str,
        expected_owner: Option<&str>,
        new: Option<LockRecord>,
    ) -> Result<bool, StoreError>;

    async fn set_linked(&self, user_id: &str, linked: bool) -> Result<(), StoreError>;
    async fn set_status(
        &self,
        user_id: &str,
        status: ProfileStatus,
        qr_challenge: Option<String>,
    ) -> Result<(), StoreError>;

    async fn load_credentials(&self, user_id: &str)
    -> Result<Option<CredentialBundle>, StoreError>;
    async fn store_credentials(
        &self,
        user_id: &str,
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError>;
    async fn delete_credentials(&self, user_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Scheduled,
    Sending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub media: Vec<crate::transport::MediaPayload>,
    pub sent_count: usize,
    pub error_log: Option<String>,
}

impl Default for Campaign {
    fn default() -> Self {
        Self {
            id: String::new(),
            user_id: String::new(),
            name: String::new(),
            status: CampaignStatus::Draft,
            scheduled_at: None,
            media: Vec::new(),
            sent_count: 0,
            error_log: None,
        }
    }
}

/// One recipient row of a campaign: where to send and the (spintax)
/// template to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub phone: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

/// Work queue of pending batch jobs, claimed with at-least-once semantics:
/// the claim is a conditional status transition that succeeds only while the
/// campaign is still in the expected prior status.
#[async_trait]
pub trait CampaignQueue: Send + Sync {
    /// Returns the single most due campaign: manual `Queued` first (oldest
    /// first), then `Scheduled` whose time has passed.
    async fn next_due(&self, now: DateTime<Utc>) -> Result<Option<Campaign>, StoreError>;

    /// Conditional claim: moves the campaign to `to` only if it is still in
    /// one of `from`. Returns false when another worker got there first.
    async fn claim(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool, StoreError>;

    async fn recipients(&self, campaign_id: &str) -> Result<Vec<CampaignRecipient>, StoreError>;

    /// Per-message telemetry, written after every attempt.
    async fn record_message(
        &self,
        campaign_id: &str,
        phone: &str,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Campaign-level progress/finalization telemetry.
    async fn update_progress(
        &self,
        campaign_id: &str,
        sent_count: usize,
        status: CampaignStatus,
    ) -> Result<(), StoreError>;

    async fn record_error(&self, campaign_id: &str, error_log: &str) -> Result<(), StoreError>;
}
