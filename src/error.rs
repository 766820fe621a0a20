use thiserror::Error;

/// Errors produced by the remote profile/campaign store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("campaign {0} not found")]
    CampaignNotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors surfaced by the session orchestrator.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Another instance holds a live lock for this user. Not an end-user
    /// error; the caller must simply not proceed.
    #[error("session lock for user is held by another instance")]
    LockDenied,
    /// The underlying protocol client could not be constructed. The client
    /// is opaque, so whatever it reported is carried as-is.
    #[error("failed to initialize protocol client: {0}")]
    Initialization(#[from] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by the dispatch engine. Per-recipient send failures are
/// data (recorded in `SendRecord`), never control flow; only preconditions
/// fail the call itself.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("session is not fully established")]
    NotReady,
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("campaign {id} has no recipients")]
    NoRecipients { id: String },
    #[error("session failed to stabilize before timeout")]
    LinkTimeout,
}
