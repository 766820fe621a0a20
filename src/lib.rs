//! Per-user connection orchestration and bulk dispatch for a WhatsApp-style
//! messaging network.
//!
//! The protocol client itself is a black box behind [`transport`]; this
//! crate owns everything around it: the distributed session lock, credential
//! persistence (remote-authoritative with a disk cache), the per-user
//! lifecycle state machine, and paced, resumable batch delivery.

pub mod bridge;
pub mod config;
pub mod creds;
pub mod dispatch;
pub mod error;
pub mod jid;
pub mod lock;
pub mod registry;
pub mod session;
pub mod spintax;
pub mod store;
pub mod transport;
pub mod worker;

pub use bridge::{Bridge, SessionStatus};
pub use config::{BridgeConfig, PacingPolicy};
pub use dispatch::{DispatchJob, Dispatcher, SendRecord};
pub use error::{BridgeError, DispatchError, StoreError, WorkerError};
pub use jid::Jid;
pub use session::SessionHandle;
pub use worker::{CampaignWorker, PulseOutcome};
