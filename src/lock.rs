//! Distributed per-user session lock.
//!
//! One remote record per user names the owning instance and when it claimed
//! ownership. A claim past its TTL is abandoned and may be seized. Writes go
//! through the store's conditional swap, so two instances racing for the
//! same user resolve to exactly one winner. Store errors during acquisition
//! fail closed.

use crate::store::{LockRecord, ProfileStore};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct LockManager {
    store: Arc<dyn ProfileStore>,
    instance_id: String,
    ttl: chrono::Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn ProfileStore>, instance_id: String, ttl: chrono::Duration) -> Self {
        Self {
            store,
            instance_id,
            ttl,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Attempts to claim ownership of `user_id`'s session. Re-acquiring an
    /// already-held lock refreshes its stamp. Returns false when another
    /// instance holds a live claim, when the conditional write loses a race,
    /// or when the store errors.
    pub async fn acquire(&self, user_id: &str) -> bool {
        let observed = match self.store.load_profile(user_id).await {
            Ok(profile) => profile.lock,
            Err(e) => {
                warn!(target: "Bridge/Lock", "Lock read for {user_id} failed, treating as denied: {e}");
                return false;
            }
        };

        let now = Utc::now();
        if let Some(record) = &observed {
            let live = now - record.acquired_at < self.ttl;
            if record.owner_instance_id != self.instance_id {
                if live {
                    debug!(
                        target: "Bridge/Lock",
                        "Lock for {user_id} held by {} ({}s old)",
                        record.owner_instance_id,
                        (now - record.acquired_at).num_seconds()
                    );
                    return false;
                }
                info!(
                    target: "Bridge/Lock",
                    "Seizing abandoned lock for {user_id} from {}",
                    record.owner_instance_id
                );
            }
        }

        let expected = observed.as_ref().map(|r| r.owner_instance_id.clone());
        let new = LockRecord {
            owner_instance_id: self.instance_id.clone(),
            acquired_at: now,
        };
        match self
            .store
            .swap_lock(user_id, expected.as_deref(), Some(new))
            .await
        {
            Ok(true) => {
                debug!(target: "Bridge/Lock", "Acquired lock for {user_id}");
                true
            }
            Ok(false) => {
                debug!(target: "Bridge/Lock", "Lost lock race for {user_id}");
                false
            }
            Err(e) => {
                warn!(target: "Bridge/Lock", "Lock write for {user_id} failed, treating as denied: {e}");
                false
            }
        }
    }

    /// Clears the claim if and only if this instance owns it. Never clears
    /// another owner's lock.
    pub async fn release(&self, user_id: &str) {
        let owner = match self.store.load_profile(user_id).await {
            Ok(profile) => profile.lock.map(|r| r.owner_instance_id),
            Err(e) => {
                warn!(target: "Bridge/Lock", "Lock read during release for {user_id} failed: {e}");
                return;
            }
        };
        if owner.as_deref() != Some(self.instance_id.as_str()) {
            debug!(
                target: "Bridge/Lock",
                "Not releasing lock for {user_id}: owned by {owner:?}"
            );
            return;
        }
        match self
            .store
            .swap_lock(user_id, Some(&self.instance_id), None)
            .await
        {
            Ok(true) => debug!(target: "Bridge/Lock", "Released lock for {user_id}"),
            Ok(false) => debug!(target: "Bridge/Lock", "Lock for {user_id} changed hands before release"),
            Err(e) => warn!(target: "Bridge/Lock", "Lock release for {user_id} failed: {e}"),
        }
    }
}
