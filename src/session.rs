//! Per-user session state and its lifecycle loop.
//!
//! Every live session is one `SessionHandle` plus one `drive_session` task
//! consuming the protocol client's event stream and translating it into
//! state transitions: QR issued, identity resolved, transport open, close.
//! Transient closes schedule a jittered soft-reconnect; fatal closes purge
//! the session entirely (registry, credentials, linked flag, lock).

use crate::config::{BridgeConfig, random_duration};
use crate::creds::CredentialManager;
use crate::lock::LockManager;
use crate::registry::SessionRegistry;
use crate::store::{ProfileStatus, ProfileStore};
use crate::transport::{DisconnectReason, Transport, TransportEvent, TransportFactory};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Notify, mpsc};

/// Process-local state of one user's session, owned exclusively by the
/// instance that created it.
///
/// Invariants, maintained by the transition methods: an open socket implies
/// an established identity, and a pending QR challenge implies no identity.
pub struct SessionHandle {
    pub user_id: String,
    transport: StdMutex<Arc<dyn Transport>>,
    qr_challenge: StdMutex<Option<String>>,
    has_identity: AtomicBool,
    socket_open: AtomicBool,
    initializing: AtomicBool,
    started_at: StdMutex<DateTime<Utc>>,
    shutdown: Notify,
}

impl SessionHandle {
    pub(crate) fn new(
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        has_identity: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            transport: StdMutex::new(transport),
            qr_challenge: StdMutex::new(None),
            has_identity: AtomicBool::new(has_identity),
            socket_open: AtomicBool::new(false),
            initializing: AtomicBool::new(true),
            started_at: StdMutex::new(Utc::now()),
            shutdown: Notify::new(),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.lock().expect("transport lock poisoned").clone()
    }

    pub fn qr_challenge(&self) -> Option<String> {
        self.qr_challenge.lock().expect("qr lock poisoned").clone()
    }

    pub fn has_identity(&self) -> bool {
        self.has_identity.load(Ordering::Acquire)
    }

    pub fn socket_open(&self) -> bool {
        self.socket_open.load(Ordering::Acquire)
    }

    /// Strict readiness: the transport is fully open and able to accept
    /// sends.
    pub fn is_ready(&self) -> bool {
        self.socket_open() && self.has_identity()
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        *self.started_at.lock().expect("started_at lock poisoned")
    }

    /// A ghost is an entry stuck in initialization past the timeout without
    /// ever producing a QR challenge or opening the socket.
    pub fn is_ghost(&self, timeout: chrono::Duration) -> bool {
        self.is_initializing()
            && !self.socket_open()
            && self.qr_challenge().is_none()
            && Utc::now() - self.started_at() > timeout
    }

    /// True when there is nothing left alive about this entry: not ready,
    /// not initializing, no challenge pending. `connect` tears such entries
    /// down and starts fresh.
    pub fn is_defunct(&self) -> bool {
        !self.is_ready()
            && !self.has_identity()
            && !self.is_initializing()
            && self.qr_challenge().is_none()
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn set_qr(&self, code: String) {
        *self.qr_challenge.lock().expect("qr lock poisoned") = Some(code);
        self.has_identity.store(false, Ordering::Release);
        self.initializing.store(false, Ordering::Release);
    }

    fn mark_identity(&self) {
        *self.qr_challenge.lock().expect("qr lock poisoned") = None;
        self.has_identity.store(true, Ordering::Release);
    }

    fn mark_open(&self) {
        *self.qr_challenge.lock().expect("qr lock poisoned") = None;
        self.has_identity.store(true, Ordering::Release);
        self.socket_open.store(true, Ordering::Release);
        self.initializing.store(false, Ordering::Release);
    }

    fn mark_closed(&self) {
        *self.qr_challenge.lock().expect("qr lock poisoned") = None;
        self.socket_open.store(false, Ordering::Release);
    }

    fn begin_reinit(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock().expect("transport lock poisoned") = transport;
        *self.started_at.lock().expect("started_at lock poisoned") = Utc::now();
        self.initializing.store(true, Ordering::Release);
    }
}

/// Everything the lifecycle loop needs besides the handle itself. One per
/// bridge instance, shared by all session tasks.
pub(crate) struct SessionContext {
    pub config: BridgeConfig,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn ProfileStore>,
    pub creds: Arc<CredentialManager>,
    pub lock: Arc<LockManager>,
    pub factory: Arc<dyn TransportFactory>,
}

impl SessionContext {
    async fn set_profile_status(&self, user_id: &str, status: ProfileStatus, qr: Option<String>) {
        if let Err(e) = self.store.set_status(user_id, status, qr).await {
            warn!(target: "Bridge/Session", "Failed to persist status for {user_id}: {e}");
        }
    }
}

/// The lifecycle loop for one session. Runs until the session terminates,
/// the transport event channel dies without replacement, or a shutdown is
/// requested through the handle.
pub(crate) async fn drive_session(
    ctx: Arc<SessionContext>,
    handle: Arc<SessionHandle>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    let user_id = handle.user_id.clone();
    debug!(target: "Bridge/Session", "Session loop started for {user_id}");

    loop {
        let event = tokio::select! {
            biased;
            _ = handle.shutdown.notified() => {
                debug!(target: "Bridge/Session", "Shutdown signaled for {user_id}, closing transport");
                handle.transport().disconnect().await;
                return;
            }
            ev = events.recv() => ev.unwrap_or(TransportEvent::Close(DisconnectReason::Unknown)),
        };

        match event {
            TransportEvent::QrChallenge(code) => {
                info!(target: "Bridge/Session", "QR challenge issued for {user_id}");
                handle.set_qr(code.clone());
                ctx.set_profile_status(&user_id, ProfileStatus::AwaitingScan, Some(code))
                    .await;
            }
            TransportEvent::IdentityResolved => {
                info!(target: "Bridge/Session", "Identity resolved for {user_id}, linking");
                handle.mark_identity();
                ctx.set_profile_status(&user_id, ProfileStatus::Linking, None)
                    .await;
            }
            TransportEvent::Open => {
                info!(target: "Bridge/Session", "Transport open for {user_id}");
                handle.mark_open();
                ctx.set_profile_status(&user_id, ProfileStatus::Linked, None)
                    .await;
                if let Err(e) = ctx.store.set_linked(&user_id, true).await {
                    warn!(target: "Bridge/Session", "Failed to persist linked flag for {user_id}: {e}");
                }
            }
            TransportEvent::CredentialsUpdated(bundle) => {
                debug!(target: "Bridge/Session", "Credential update for {user_id}");
                ctx.creds.save(&user_id, bundle).await;
            }
            TransportEvent::Close(reason) => {
                handle.mark_closed();
                if reason.is_fatal() {
                    info!(
                        target: "Bridge/Session",
                        "Fatal close for {user_id} ({reason:?}), purging session"
                    );
                    terminate_session(&ctx, &handle).await;
                    return;
                }
                warn!(
                    target: "Bridge/Session",
                    "Transient close for {user_id} ({reason:?}), scheduling reconnect"
                );
                match soft_reconnect(&ctx, &handle).await {
                    Some(new_events) => events = new_events,
                    None => return,
                }
            }
        }
    }
}

/// Full teardown on fatal disconnect (logout / auth revoked): the user must
/// re-pair from scratch.
pub(crate) async fn terminate_session(ctx: &SessionContext, handle: &Arc<SessionHandle>) {
    let user_id = &handle.user_id;
    ctx.registry.remove_if_same(user_id, handle);
    handle.transport().disconnect().await;
    if let Err(e) = ctx.creds.purge(user_id).await {
        error!(target: "Bridge/Session", "Failed to purge credentials for {user_id}: {e}");
    }
    if let Err(e) = ctx.store.set_linked(user_id, false).await {
        warn!(target: "Bridge/Session", "Failed to clear linked flag for {user_id}: {e}");
    }
    ctx.set_profile_status(user_id, ProfileStatus::Unlinked, None)
        .await;
    ctx.lock.release(user_id).await;
}

/// Waits out a jittered delay, then re-initializes the transport in place —
/// but only if the registry still maps the user to this handle. An explicit
/// disconnect in the meantime wins and the loop exits instead of zombieing
/// back to life.
async fn soft_reconnect(
    ctx: &SessionContext,
    handle: &Arc<SessionHandle>,
) -> Option<mpsc::Receiver<TransportEvent>> {
    let user_id = &handle.user_id;
    let delay = random_duration(
        ctx.config.reconnect_delay_min,
        ctx.config.reconnect_delay_max,
        &mut rand::rng(),
    );
    debug!(target: "Bridge/Session", "Reconnecting {user_id} in {delay:?}");

    tokio::select! {
        biased;
        _ = handle.shutdown.notified() => {
            debug!(target: "Bridge/Session", "Shutdown during reconnect wait for {user_id}");
            handle.transport().disconnect().await;
            return None;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    if !ctx.registry.still_current(user_id, handle) {
        debug!(
            target: "Bridge/Session",
            "Entry for {user_id} was removed during reconnect wait, not reviving"
        );
        return None;
    }

    let credentials = match ctx.creds.restore(user_id).await {
        Ok(c) => c,
        Err(e) => {
            error!(target: "Bridge/Session", "Credential restore for {user_id} failed: {e}");
            None
        }
    };

    match ctx
        .factory
        .create_transport(user_id, credentials.clone())
        .await
    {
        Ok((transport, new_events)) => {
            handle.begin_reinit(transport);
            if credentials.is_none_or(|c| !c.has_identity()) {
                handle.has_identity.store(false, Ordering::Release);
            }
            info!(target: "Bridge/Session", "Re-initialized transport for {user_id}");
            Some(new_events)
        }
        Err(e) => {
            // Initialization failure: leave the registry clean and give the
            // lock back, but keep credentials so a later attempt can resume.
            error!(target: "Bridge/Session", "Re-initialization for {user_id} failed: {e}");
            ctx.registry.remove_if_same(user_id, handle);
            ctx.lock.release(user_id).await;
            None
        }
    }
}
