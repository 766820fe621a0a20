//! Credential bundle lifecycle.
//!
//! The remote store is authoritative; local disk is a write-through cache so
//! a restarted process can come back without re-pairing even while the
//! remote mirror is catching up. Mirror writes are fire-and-forget: the
//! session event loop marks the bundle dirty and a background task flushes,
//! never stalling event handling on a remote round-trip.

use crate::error::StoreError;
use crate::store::{CredentialBundle, ProfileStore};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, Notify};

pub struct CredentialManager {
    store: Arc<dyn ProfileStore>,
    base_path: PathBuf,
    pending_mirror: Mutex<HashMap<String, CredentialBundle>>,
    mirror_notify: Notify,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn ProfileStore>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            pending_mirror: Mutex::new(HashMap::new()),
            mirror_notify: Notify::new(),
        }
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn bundle_path(&self, user_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", Self::sanitize_filename(user_id)))
    }

    async fn read_disk(&self, user_id: &str) -> Result<Option<CredentialBundle>, StoreError> {
        match fs::read(self.bundle_path(user_id)).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_disk(&self, user_id: &str, bundle: &CredentialBundle) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_path).await?;
        let data = serde_json::to_vec_pretty(bundle)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(self.bundle_path(user_id), data)
            .await
            .map_err(StoreError::Io)
    }

    async fn remove_disk(&self, user_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.bundle_path(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Pulls remote state and reconciles the disk cache to it. Remote wins:
    /// a bundle only on disk means the remote copy was reset elsewhere, so
    /// the stale cache is dropped rather than trusted.
    pub async fn restore(&self, user_id: &str) -> Result<Option<CredentialBundle>, StoreError> {
        match self.store.load_credentials(user_id).await? {
            Some(bundle) => {
                if let Err(e) = self.write_disk(user_id, &bundle).await {
                    warn!(target: "Bridge/Creds", "Failed to refresh disk cache for {user_id}: {e}");
                }
                Ok(Some(bundle))
            }
            None => {
                if self.read_disk(user_id).await?.is_some() {
                    debug!(
                        target: "Bridge/Creds",
                        "Dropping stale disk credentials for {user_id} (remote has none)"
                    );
                    self.remove_disk(user_id).await?;
                }
                Ok(None)
            }
        }
    }

    /// Persists a credential update: disk immediately, remote via the
    /// background mirror task.
    pub async fn save(&self, user_id: &str, bundle: CredentialBundle) {
        if let Err(e) = self.write_disk(user_id, &bundle).await {
            error!(target: "Bridge/Creds", "Failed to write disk credentials for {user_id}: {e}");
        }
        self.pending_mirror
            .lock()
            .await
            .insert(user_id.to_string(), bundle);
        self.mirror_notify.notify_one();
    }

    /// Deletes local and remote credential material (logout/reset).
    pub async fn purge(&self, user_id: &str) -> Result<(), StoreError> {
        self.pending_mirror.lock().await.remove(user_id);
        self.remove_disk(user_id).await?;
        self.store.delete_credentials(user_id).await
    }

    async fn flush_pending(&self) {
        let pending: Vec<(String, CredentialBundle)> =
            self.pending_mirror.lock().await.drain().collect();
        for (user_id, bundle) in pending {
            if let Err(e) = self.store.store_credentials(&user_id, &bundle).await {
                error!(target: "Bridge/Creds", "Mirror write for {user_id} failed, re-queueing: {e}");
                // Put it back unless a newer bundle arrived meanwhile.
                self.pending_mirror
                    .lock()
                    .await
                    .entry(user_id)
                    .or_insert(bundle);
            }
        }
    }

    /// Background task flushing dirty bundles to the remote store.
    pub fn run_mirror(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.mirror_notify.notified() => {
                        debug!(target: "Bridge/Creds", "Mirror notification received");
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                self.flush_pending().await;
            }
        });
    }

    /// Synchronous flush, used by tests and orderly shutdown.
    pub async fn flush(&self) {
        self.flush_pending().await;
    }
}
