//! Campaign queue worker.
//!
//! Driven by an external periodic trigger. Each pulse claims at most one
//! due campaign via a conditional status transition (the mechanism that
//! keeps two workers off the same job), makes sure the owning user's
//! session is strictly ready, runs the batch, and writes telemetry as it
//! goes. Connection-class failures re-queue the campaign; data failures
//! mark it failed.

use crate::bridge::Bridge;
use crate::dispatch::{DispatchJob, Dispatcher};
use crate::error::{DispatchError, WorkerError};
use crate::store::{CampaignQueue, CampaignStatus, MessageStatus};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PulseOutcome {
    pub campaign_id: String,
    pub successful: usize,
    pub total: usize,
}

pub struct CampaignWorker {
    bridge: Arc<Bridge>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn CampaignQueue>,
}

impl CampaignWorker {
    pub fn new(bridge: Arc<Bridge>, dispatcher: Arc<Dispatcher>, queue: Arc<dyn CampaignQueue>) -> Self {
        Self {
            bridge,
            dispatcher,
            queue,
        }
    }

    /// One worker pulse. Returns `Ok(None)` when there is nothing due or
    /// another worker claimed the campaign first.
    pub async fn process_due(&self) -> Result<Option<PulseOutcome>, WorkerError> {
        let now = Utc::now();
        let Some(campaign) = self.queue.next_due(now).await? else {
            debug!(target: "Bridge/Worker", "No campaigns due");
            return Ok(None);
        };
        info!(
            target: "Bridge/Worker",
            "Targeting campaign {} ({})", campaign.name, campaign.id
        );

        let claimed = self
            .queue
            .claim(
                &campaign.id,
                &[CampaignStatus::Queued, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
            )
            .await?;
        if !claimed {
            warn!(
                target: "Bridge/Worker",
                "Campaign {} already claimed by another worker", campaign.id
            );
            return Ok(None);
        }

        let recipients = self.queue.recipients(&campaign.id).await?;
        if recipients.is_empty() {
            self.queue
                .record_error(&campaign.id, "No recipient messages found")
                .await?;
            self.queue
                .update_progress(&campaign.id, 0, CampaignStatus::Failed)
                .await?;
            return Err(WorkerError::NoRecipients {
                id: campaign.id.clone(),
            });
        }

        if !self.ensure_ready(&campaign.user_id).await {
            // Connection problem, not a data problem: give the campaign
            // back to the queue for a later pulse.
            self.requeue(&campaign.id, campaign.sent_count, "Session failed to stabilize")
                .await?;
            return Err(WorkerError::LinkTimeout);
        }

        let jobs: Vec<DispatchJob> = recipients
            .iter()
            .map(|r| DispatchJob {
                recipient: r.phone.clone(),
                template: r.message.clone(),
                media: campaign.media.clone(),
            })
            .collect();

        let queue = self.queue.clone();
        let campaign_id = campaign.id.clone();
        let result = self
            .dispatcher
            .send_batch(&campaign.user_id, &jobs, |sent, _total, record| {
                let queue = queue.clone();
                let campaign_id = campaign_id.clone();
                async move {
                    let status = if record.success {
                        MessageStatus::Sent
                    } else {
                        MessageStatus::Failed
                    };
                    if let Err(e) = queue
                        .record_message(&campaign_id, &record.recipient, status, record.error.as_deref())
                        .await
                    {
                        warn!(target: "Bridge/Worker", "Message telemetry write failed: {e}");
                    }
                    if let Err(e) = queue
                        .update_progress(&campaign_id, sent, CampaignStatus::Sending)
                        .await
                    {
                        warn!(target: "Bridge/Worker", "Progress telemetry write failed: {e}");
                    }
                }
            })
            .await;

        let records = match result {
            Ok(records) => records,
            Err(DispatchError::NotReady) => {
                self.requeue(&campaign.id, campaign.sent_count, "Session lost before batch start")
                    .await?;
                return Err(WorkerError::LinkTimeout);
            }
            Err(e) => {
                self.queue.record_error(&campaign.id, &e.to_string()).await?;
                self.queue
                    .update_progress(&campaign.id, campaign.sent_count, CampaignStatus::Failed)
                    .await?;
                return Ok(None);
            }
        };

        let successful = records.iter().filter(|r| r.success).count();
        self.queue
            .update_progress(&campaign.id, successful, CampaignStatus::Completed)
            .await?;
        info!(
            target: "Bridge/Worker",
            "Campaign {} completed: {}/{} sent", campaign.id, successful, records.len()
        );

        Ok(Some(PulseOutcome {
            campaign_id: campaign.id,
            successful,
            total: records.len(),
        }))
    }

    /// Waits for strict readiness, kicking `connect` periodically the way a
    /// status poller would. Lock denial means another instance hosts the
    /// session and this worker cannot send through it.
    async fn ensure_ready(&self, user_id: &str) -> bool {
        let registry = self.bridge.registry().clone();
        if registry.is_ready(user_id) {
            return true;
        }

        info!(target: "Bridge/Worker", "Session for {user_id} not ready, synchronizing");
        let config = self.bridge.config();
        let polls = config.link_wait.as_secs().max(1);
        let kick_every = config.link_kick_every.max(1) as u64;

        for poll in 0..polls {
            if poll % kick_every == 0 {
                if let Err(e) = self.bridge.connect(user_id).await {
                    debug!(target: "Bridge/Worker", "Connect kick for {user_id}: {e}");
                }
            }
            if registry.is_ready(user_id) {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        registry.is_ready(user_id)
    }

    async fn requeue(
        &self,
        campaign_id: &str,
        sent_count: usize,
        reason: &str,
    ) -> Result<(), WorkerError> {
        warn!(
            target: "Bridge/Worker",
            "Re-queueing campaign {campaign_id}: {reason}"
        );
        self.queue.record_error(campaign_id, reason).await?;
        self.queue
            .update_progress(campaign_id, sent_count, CampaignStatus::Queued)
            .await?;
        Ok(())
    }
}
