use crate::jid::NumberRules;
use rand::RngCore;
use std::path::PathBuf;
use std::time::Duration;

/// Pacing policy for batch dispatch. Approximates a human sending cadence so
/// the messaging network's automated-abuse heuristics are not triggered.
/// Tunable policy, not a protocol requirement.
#[derive(Clone, Debug)]
pub struct PacingPolicy {
    /// Gap between consecutive sends, jittered within this range.
    pub message_gap_min: Duration,
    pub message_gap_max: Duration,
    /// Every Nth sent message incurs an extra cooldown.
    pub cooldown_every: usize,
    pub cooldown_min: Duration,
    pub cooldown_max: Duration,
    /// Fixed gap between attachments of a single multi-media send.
    pub media_gap: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            message_gap_min: Duration::from_secs(3),
            message_gap_max: Duration::from_secs(7),
            cooldown_every: 24,
            cooldown_min: Duration::from_secs(15),
            cooldown_max: Duration::from_secs(30),
            media_gap: Duration::from_secs(1),
        }
    }
}

impl PacingPolicy {
    /// Gap to sleep after the `sent`th successful send (1-based).
    pub fn gap_after(&self, sent: usize, rng: &mut impl rand::Rng) -> Duration {
        let mut gap = random_duration(self.message_gap_min, self.message_gap_max, rng);
        if self.cooldown_every > 0 && sent % self.cooldown_every == 0 {
            gap += random_duration(self.cooldown_min, self.cooldown_max, rng);
        }
        gap
    }

    /// A policy with all delays zeroed, for tests.
    pub fn immediate() -> Self {
        Self {
            message_gap_min: Duration::ZERO,
            message_gap_max: Duration::ZERO,
            cooldown_every: 0,
            cooldown_min: Duration::ZERO,
            cooldown_max: Duration::ZERO,
            media_gap: Duration::ZERO,
        }
    }
}

pub(crate) fn random_duration(min: Duration, max: Duration, rng: &mut impl rand::Rng) -> Duration {
    if max <= min {
        return min;
    }
    Duration::from_millis(rng.random_range(min.as_millis() as u64..=max.as_millis() as u64))
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Identifier of this process instance, stamped into the remote lock
    /// record so other instances can tell who owns a session.
    pub instance_id: String,
    /// Directory for the local credential cache.
    pub auth_dir: PathBuf,
    /// Age past which a remote lock is treated as abandoned.
    pub lock_ttl: chrono::Duration,
    /// An entry stuck in initialization for longer than this without a QR
    /// challenge or an open socket is a ghost and gets purged.
    pub ghost_timeout: chrono::Duration,
    /// Jitter range for the soft-reconnect delay after a transient close.
    pub reconnect_delay_min: Duration,
    pub reconnect_delay_max: Duration,
    /// How long the campaign worker waits for strict readiness.
    pub link_wait: Duration,
    /// While waiting, re-kick `connect` every this many polls (1s apart).
    pub link_kick_every: u32,
    /// Interval of the background credential mirror task.
    pub mirror_interval: Duration,
    pub pacing: PacingPolicy,
    pub numbers: NumberRules,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let mut id_bytes = [0u8; 4];
        rand::rng().fill_bytes(&mut id_bytes);
        Self {
            instance_id: format!(
                "instance-{:02x}{:02x}{:02x}{:02x}",
                id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]
            ),
            auth_dir: PathBuf::from(".wa_auth"),
            lock_ttl: chrono::Duration::seconds(60),
            ghost_timeout: chrono::Duration::seconds(40),
            reconnect_delay_min: Duration::from_secs(2),
            reconnect_delay_max: Duration::from_secs(6),
            link_wait: Duration::from_secs(30),
            link_kick_every: 5,
            mirror_interval: Duration::from_secs(10),
            pacing: PacingPolicy::default(),
            numbers: NumberRules::default(),
        }
    }
}
