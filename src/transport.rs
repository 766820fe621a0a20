//! Seam to the underlying protocol client.
//!
//! The wire protocol is out of scope here; the client is a black box that
//! can produce pairing challenges, emit connection-state events, and send
//! messages given a JID and a payload. Production wires a real client in
//! behind these traits; tests script one.

use crate::jid::Jid;
use crate::store::CredentialBundle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close reason as classified by the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit logout or auth revocation. The session is gone for good and
    /// the user must re-pair.
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    /// Another device/session took over the stream.
    ConnectionReplaced,
    Unknown,
}

impl DisconnectReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Events emitted by the protocol client over the lifetime of one session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing challenge was issued; the encoded payload is shown to the
    /// user as a QR code.
    QrChallenge(String),
    /// Local credentials resolved to a known identity (restored login or a
    /// completed pairing scan). The transport is not necessarily open yet.
    IdentityResolved,
    /// Transport fully negotiated; sends are possible.
    Open,
    /// Credential material changed and must be persisted.
    CredentialsUpdated(CredentialBundle),
    Close(DisconnectReason),
}

/// Media attachment payload. The body is an opaque reference (URL or
/// upload handle) the protocol client knows how to materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub reference: String,
    pub mimetype: String,
    pub filename: Option<String>,
}

/// What kind of send the attachment maps to on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaPayload {
    pub fn kind(&self) -> MediaKind {
        if self.mimetype.starts_with("image/") {
            MediaKind::Image
        } else if self.mimetype.starts_with("video/") {
            MediaKind::Video
        } else if self.mimetype.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, to: &Jid, body: &str) -> Result<(), anyhow::Error>;
    /// Sends one attachment, optionally carrying the caption text.
    async fn send_media(
        &self,
        to: &Jid,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<(), anyhow::Error>;
    async fn disconnect(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a client for one user session. `credentials` is the restored
    /// bundle when one exists; `None` starts a fresh pairing flow.
    async fn create_transport(
        &self,
        user_id: &str,
        credentials: Option<CredentialBundle>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(mimetype: &str) -> MediaPayload {
        MediaPayload {
            reference: "upload/x".to_string(),
            mimetype: mimetype.to_string(),
            filename: None,
        }
    }

    #[test]
    fn test_media_kind_from_mimetype() {
        assert_eq!(payload("image/jpeg").kind(), MediaKind::Image);
        assert_eq!(payload("video/mp4").kind(), MediaKind::Video);
        assert_eq!(payload("audio/ogg").kind(), MediaKind::Audio);
        assert_eq!(payload("application/pdf").kind(), MediaKind::Document);
        assert_eq!(payload("text/plain").kind(), MediaKind::Document);
    }
}
