//! Process-local registry of live sessions.
//!
//! Single source of truth for "is this instance hosting this session". Only
//! the instance that holds the user's remote lock ever touches its entry;
//! cross-instance coordination goes through the remote store, never through
//! this map.

use crate::session::SessionHandle;
use dashmap::DashMap;
use log::warn;
use std::sync::Arc;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionHandle>>,
    ghost_timeout: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(ghost_timeout: chrono::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ghost_timeout,
        }
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.insert(handle.user_id.clone(), handle);
    }

    /// Returns the live entry for `user_id`, purging it first if it turns
    /// out to be a ghost (stuck mid-initialization past the timeout without
    /// a QR challenge or an open socket).
    pub fn observe(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.get(user_id)?.clone();
        if handle.is_ghost(self.ghost_timeout) {
            warn!(
                target: "Bridge/Registry",
                "Purging ghost session for {user_id} (stuck initializing since {})",
                handle.started_at()
            );
            self.remove_if_same(user_id, &handle);
            handle.request_shutdown();
            return None;
        }
        Some(handle)
    }

    pub fn remove(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(user_id).map(|(_, handle)| handle)
    }

    /// Removes the entry only if it is still this exact handle. A reconnect
    /// loop uses this to avoid tearing down a fresh session that replaced
    /// the one it was driving.
    pub fn remove_if_same(&self, user_id: &str, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .remove_if(user_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// True while the registry still maps `user_id` to this exact handle.
    pub fn still_current(&self, user_id: &str, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .get(user_id)
            .is_some_and(|current| Arc::ptr_eq(&current, handle))
    }

    /// Strict readiness: identity established AND transport fully open.
    /// The only gate the send path consults.
    pub fn is_ready(&self, user_id: &str) -> bool {
        self.observe(user_id).is_some_and(|h| h.is_ready())
    }

    /// Optimistic readiness: identity established, transport possibly still
    /// negotiating. For status display only.
    pub fn is_linked(&self, user_id: &str) -> bool {
        self.observe(user_id).is_some_and(|h| h.has_identity())
    }

    pub fn is_initializing(&self, user_id: &str) -> bool {
        self.observe(user_id).is_some_and(|h| h.is_initializing())
    }

    pub fn qr_challenge(&self, user_id: &str) -> Option<String> {
        self.observe(user_id).and_then(|h| h.qr_challenge())
    }
}
