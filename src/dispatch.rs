//! Paced batch delivery.
//!
//! Dispatch requires strict readiness up front and re-checks it before
//! every send; a session lost mid-batch turns the remaining recipients into
//! failure records instead of silently dropping them. Each recipient is
//! attempted independently and in input order, with jittered gaps between
//! sends and a longer cooldown every Nth message.

use crate::config::PacingPolicy;
use crate::error::DispatchError;
use crate::jid::{self, NumberRules};
use crate::registry::SessionRegistry;
use crate::spintax;
use crate::transport::MediaPayload;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;

/// One unit of work: where to send, what template to resolve, and any
/// attachments. Never persisted here; result records go back to the caller.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub recipient: String,
    pub template: String,
    pub media: Vec<MediaPayload>,
}

#[derive(Debug, Clone)]
pub struct SendRecord {
    pub recipient: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    pacing: PacingPolicy,
    numbers: NumberRules,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, pacing: PacingPolicy, numbers: NumberRules) -> Self {
        Self {
            registry,
            pacing,
            numbers,
        }
    }

    /// Sends one templated message (plus attachments) to one recipient.
    pub async fn send_one(
        &self,
        user_id: &str,
        recipient: &str,
        template: &str,
        media: &[MediaPayload],
    ) -> Result<(), DispatchError> {
        self.attempt(user_id, recipient, template, media)
            .await
            .map_err(|e| {
                warn!(target: "Bridge/Dispatch", "Send to {recipient} failed: {e}");
                e
            })
    }

    async fn attempt(
        &self,
        user_id: &str,
        recipient: &str,
        template: &str,
        media: &[MediaPayload],
    ) -> Result<(), DispatchError> {
        let Some(handle) = self.registry.observe(user_id).filter(|h| h.is_ready()) else {
            return Err(DispatchError::NotReady);
        };

        let body = spintax::resolve(template, &mut rand::rng());
        let address = jid::normalize(recipient, &self.numbers);
        let transport = handle.transport();

        if media.is_empty() {
            transport
                .send_text(&address.jid, &body)
                .await
                .map_err(DispatchError::from_transport)?;
        } else {
            // Exactly one attachment carries the caption; the rest go bare,
            // each as its own send with a short fixed gap.
            for (i, payload) in media.iter().enumerate() {
                let caption = if i == 0 { body.as_str() } else { "" };
                debug!(
                    target: "Bridge/Dispatch",
                    "Sending {:?} attachment to {}", payload.kind(), address.jid
                );
                transport
                    .send_media(&address.jid, payload, caption)
                    .await
                    .map_err(DispatchError::from_transport)?;
                if i + 1 < media.len() {
                    tokio::time::sleep(self.pacing.media_gap).await;
                }
            }
        }

        debug!(target: "Bridge/Dispatch", "Sent to {}", address.jid);
        Ok(())
    }

    /// Drives a whole batch in input order. Fails fast with `NotReady` when
    /// the session is not strictly ready at the start; afterwards every
    /// per-recipient outcome is data, never control flow. `on_progress` is
    /// invoked after every attempt with the running success count, the batch
    /// size, and that attempt's record.
    pub async fn send_batch<F, Fut>(
        &self,
        user_id: &str,
        jobs: &[DispatchJob],
        mut on_progress: F,
    ) -> Result<Vec<SendRecord>, DispatchError>
    where
        F: FnMut(usize, usize, SendRecord) -> Fut,
        Fut: Future<Output = ()>,
    {
        if !self.registry.is_ready(user_id) {
            return Err(DispatchError::NotReady);
        }

        let total = jobs.len();
        let mut records = Vec::with_capacity(total);
        let mut sent = 0usize;

        for (index, job) in jobs.iter().enumerate() {
            let record = match self
                .attempt(user_id, &job.recipient, &job.template, &job.media)
                .await
            {
                Ok(()) => {
                    sent += 1;
                    SendRecord {
                        recipient: job.recipient.clone(),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => SendRecord {
                    recipient: job.recipient.clone(),
                    success: false,
                    error: Some(e.to_string()),
                },
            };

            on_progress(sent, total, record.clone()).await;

            let paused = record.success && index + 1 < total;
            records.push(record);

            if paused {
                let gap = self.pacing.gap_after(sent, &mut rand::rng());
                if !gap.is_zero() {
                    if self.pacing.cooldown_every > 0 && sent % self.pacing.cooldown_every == 0 {
                        info!(
                            target: "Bridge/Dispatch",
                            "Cooldown after {sent} messages, pausing {gap:?}"
                        );
                    }
                    tokio::time::sleep(gap).await;
                }
            }
        }

        info!(
            target: "Bridge/Dispatch",
            "Batch for {user_id} finished: {sent}/{total} sent"
        );
        Ok(records)
    }
}

impl DispatchError {
    fn from_transport(e: anyhow::Error) -> Self {
        // Collapsing to a description keeps per-recipient failures as plain
        // data in the result records.
        DispatchError::Send(e.to_string())
    }
}
