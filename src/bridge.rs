//! The connection orchestrator.
//!
//! Entry point for everything callers do with a session: connect it, tear
//! it down, read its status, or nudge a dormant one awake. One `Bridge` per
//! process instance owns the registry, the distributed lock manager, and
//! the credential manager; nothing here is ambient global state.

use crate::config::BridgeConfig;
use crate::creds::CredentialManager;
use crate::error::BridgeError;
use crate::lock::LockManager;
use crate::registry::SessionRegistry;
use crate::session::{SessionContext, SessionHandle, drive_session};
use crate::store::{ProfileStatus, ProfileStore};
use crate::transport::TransportFactory;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Status snapshot combining process-local state with remote truth.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub has_challenge: bool,
    pub qr_challenge: Option<String>,
    /// Optimistic readiness: identity established (here or per the remote
    /// record). Drives the "looks connected" UI signal only.
    pub identity_established: bool,
    /// Strict readiness: transport fully open on this instance.
    pub transport_open: bool,
    pub is_initializing: bool,
}

pub struct Bridge {
    ctx: Arc<SessionContext>,
    /// Per-user single-flight gates: concurrent `connect` callers for one
    /// user await the same initialization instead of racing.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn ProfileStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.ghost_timeout));
        let creds = Arc::new(CredentialManager::new(store.clone(), &config.auth_dir));
        creds.clone().run_mirror(config.mirror_interval);
        let lock = Arc::new(LockManager::new(
            store.clone(),
            config.instance_id.clone(),
            config.lock_ttl,
        ));
        Arc::new(Self {
            ctx: Arc::new(SessionContext {
                config,
                registry,
                store,
                creds,
                lock,
                factory,
            }),
            inflight: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }

    /// Connects (or returns) the session for `user_id`.
    ///
    /// Idempotent: a live entry that is ready, initializing, linking, or
    /// showing a QR challenge is returned unchanged. A defunct entry is torn
    /// down and replaced. At most one initialization runs per user per
    /// instance; racing callers wait for the in-flight one and share its
    /// outcome.
    pub async fn connect(self: &Arc<Self>, user_id: &str) -> Result<Arc<SessionHandle>, BridgeError> {
        if let Some(existing) = self.reusable_session(user_id).await {
            return Ok(existing);
        }

        let gate = self
            .inflight
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _in_flight = gate.lock().await;

        // A racing caller may have finished initialization while we waited.
        if let Some(existing) = self.reusable_session(user_id).await {
            return Ok(existing);
        }

        if !self.ctx.lock.acquire(user_id).await {
            return Err(BridgeError::LockDenied);
        }

        info!(target: "Bridge", "Initializing session for {user_id}");
        match self.initialize_session(user_id).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // Registry is left clean and the lock goes back; credentials
                // survive so the next attempt can still resume.
                self.ctx.lock.release(user_id).await;
                Err(e)
            }
        }
    }

    async fn reusable_session(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        let handle = self.ctx.registry.observe(user_id)?;
        if !handle.is_defunct() {
            if handle.is_ready() {
                debug!(target: "Bridge", "User {user_id} already connected");
            } else if handle.qr_challenge().is_some() {
                debug!(target: "Bridge", "User {user_id} waiting for QR scan");
            } else {
                debug!(target: "Bridge", "User {user_id} already initializing");
            }
            return Some(handle);
        }
        info!(target: "Bridge", "Cleaning up dead session entry for {user_id}");
        self.ctx.registry.remove_if_same(user_id, &handle);
        handle.request_shutdown();
        None
    }

    async fn initialize_session(
        self: &Arc<Self>,
        user_id: &str,
    ) -> Result<Arc<SessionHandle>, BridgeError> {
        let credentials = self.ctx.creds.restore(user_id).await?;
        let has_identity = credentials.as_ref().is_some_and(|c| c.has_identity());

        let (transport, events) = self
            .ctx
            .factory
            .create_transport(user_id, credentials)
            .await?;

        let handle = Arc::new(SessionHandle::new(user_id, transport, has_identity));
        self.ctx.registry.insert(handle.clone());

        let ctx = self.ctx.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            drive_session(ctx, task_handle, events).await;
        });

        Ok(handle)
    }

    /// Forces full teardown from any state: event loop stopped, transport
    /// closed, registry entry removed, local and remote credentials deleted,
    /// linked flag cleared, lock released.
    pub async fn disconnect(&self, user_id: &str) -> Result<(), BridgeError> {
        info!(target: "Bridge", "Disconnecting session for {user_id}");
        if let Some(handle) = self.ctx.registry.remove(user_id) {
            handle.request_shutdown();
            handle.transport().disconnect().await;
        }
        self.ctx.creds.purge(user_id).await?;
        self.ctx.store.set_linked(user_id, false).await?;
        self.ctx
            .store
            .set_status(user_id, ProfileStatus::Unlinked, None)
            .await?;
        self.ctx.lock.release(user_id).await;
        Ok(())
    }

    /// Status for UI/polling callers. Combines the in-memory registry with
    /// the remote record (the only truth that survives instance recycling),
    /// and doubles as the wake-up bridge: a user the remote store says is
    /// linked but who has no live session here gets a background `connect`.
    pub async fn status(self: &Arc<Self>, user_id: &str) -> Result<SessionStatus, BridgeError> {
        let entry = self.ctx.registry.observe(user_id);
        let profile = self.ctx.store.load_profile(user_id).await?;

        let qr_challenge = entry
            .as_ref()
            .and_then(|h| h.qr_challenge())
            .or_else(|| (!profile.linked).then_some(profile.qr_challenge).flatten());
        let socket_alive = entry.is_some();
        let transport_open = entry.as_ref().is_some_and(|h| h.is_ready());
        let identity_established =
            profile.linked || entry.as_ref().is_some_and(|h| h.has_identity());
        let mut is_initializing = entry.as_ref().is_some_and(|h| h.is_initializing());

        // Remote truth says linked but this instance holds nothing live:
        // wake the session in the background. Repeated calls are safe; a
        // lock held elsewhere just means another instance already hosts it.
        if profile.linked && !socket_alive {
            is_initializing = true;
            let bridge = self.clone();
            let user = user_id.to_string();
            tokio::spawn(async move {
                match bridge.connect(&user).await {
                    Ok(_) => debug!(target: "Bridge", "Wake-up connect for {user} started"),
                    Err(BridgeError::LockDenied) => {
                        debug!(target: "Bridge", "Wake-up for {user} skipped: lock held elsewhere")
                    }
                    Err(e) => warn!(target: "Bridge", "Wake-up connect for {user} failed: {e}"),
                }
            });
        }

        Ok(SessionStatus {
            has_challenge: qr_challenge.is_some(),
            qr_challenge,
            identity_established,
            transport_open,
            is_initializing,
        })
    }

    /// Periodic-trigger entry point: revive a dormant linked session. No-op
    /// when a session is already live here, when the user was never linked,
    /// or when another instance holds the lock.
    pub async fn wake(self: &Arc<Self>, user_id: &str) -> Result<(), BridgeError> {
        if self.ctx.registry.observe(user_id).is_some() {
            return Ok(());
        }
        let profile = self.ctx.store.load_profile(user_id).await?;
        if !profile.linked {
            return Ok(());
        }
        match self.connect(user_id).await {
            Ok(_) => Ok(()),
            Err(BridgeError::LockDenied) => {
                debug!(target: "Bridge", "Wake for {user_id} skipped: lock held elsewhere");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Immediate teardown used by tests and orderly shutdown paths; unlike
    /// `disconnect` it keeps credentials (the session can resume later).
    pub async fn shutdown_session(&self, user_id: &str) {
        if let Some(handle) = self.ctx.registry.remove(user_id) {
            handle.request_shutdown();
            handle.transport().disconnect().await;
        }
        self.ctx.lock.release(user_id).await;
    }
}
