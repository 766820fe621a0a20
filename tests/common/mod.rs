#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use wabridge::config::{BridgeConfig, PacingPolicy};
use wabridge::jid::Jid;
use wabridge::store::CredentialBundle;
use wabridge::transport::{MediaPayload, Transport, TransportEvent, TransportFactory};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
    pub media_ref: Option<String>,
}

pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_matching: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockTransport {
    fn should_fail(&self, to: &Jid) -> bool {
        let needles = self.fail_matching.lock().expect("fail list poisoned");
        needles.iter().any(|n| to.to_string().contains(n))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, to: &Jid, body: &str) -> Result<(), anyhow::Error> {
        if self.should_fail(to) {
            return Err(anyhow::anyhow!("scripted send failure"));
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            media_ref: None,
        });
        Ok(())
    }

    async fn send_media(
        &self,
        to: &Jid,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<(), anyhow::Error> {
        if self.should_fail(to) {
            return Err(anyhow::anyhow!("scripted send failure"));
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            body: caption.to_string(),
            media_ref: Some(media.reference.clone()),
        });
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// What the scripted client does right after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Emits nothing; the session stays stuck initializing.
    Silent,
    /// Emits a QR challenge unless restored credentials already establish
    /// an identity (in which case it links and opens like a resumed login).
    EmitQr,
    /// Emits identity + open immediately (resumed session).
    AutoOpen,
}

pub struct ScriptedFactory {
    script: Script,
    senders: DashMap<String, mpsc::Sender<TransportEvent>>,
    pub sent: Arc<Mutex<Vec<SentMessage>>>,
    pub fail_matching: Arc<std::sync::Mutex<Vec<String>>>,
    pub create_count: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            senders: DashMap::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_matching: Arc::new(std::sync::Mutex::new(Vec::new())),
            create_count: AtomicUsize::new(0),
        })
    }

    pub fn fail_sends_matching(&self, needle: &str) {
        self.fail_matching
            .lock()
            .expect("fail list poisoned")
            .push(needle.to_string());
    }

    /// Pushes a scripted event into the live session's event stream.
    pub async fn push(&self, user_id: &str, event: TransportEvent) {
        let tx = self
            .senders
            .get(user_id)
            .expect("no live transport for user")
            .clone();
        tx.send(event).await.expect("session loop dropped receiver");
    }

    pub fn creations(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create_transport(
        &self,
        user_id: &str,
        credentials: Option<CredentialBundle>,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(32);

        let resumed = credentials.as_ref().is_some_and(|c| c.has_identity());
        match self.script {
            Script::Silent => {}
            Script::AutoOpen => {
                let _ = tx.send(TransportEvent::IdentityResolved).await;
                let _ = tx.send(TransportEvent::Open).await;
            }
            Script::EmitQr => {
                if resumed {
                    let _ = tx.send(TransportEvent::IdentityResolved).await;
                    let _ = tx.send(TransportEvent::Open).await;
                } else {
                    let _ = tx
                        .send(TransportEvent::QrChallenge("qr-token-1".to_string()))
                        .await;
                }
            }
        }

        self.senders.insert(user_id.to_string(), tx);
        Ok((
            Arc::new(MockTransport {
                sent: self.sent.clone(),
                fail_matching: self.fail_matching.clone(),
            }),
            rx,
        ))
    }
}

/// Config with all pacing/backoff delays collapsed so tests run fast.
pub fn test_config(instance_id: &str, auth_dir: &std::path::Path) -> BridgeConfig {
    BridgeConfig {
        instance_id: instance_id.to_string(),
        auth_dir: auth_dir.to_path_buf(),
        reconnect_delay_min: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(20),
        link_wait: Duration::from_secs(2),
        link_kick_every: 1,
        mirror_interval: Duration::from_millis(20),
        pacing: PacingPolicy::immediate(),
        ..BridgeConfig::default()
    }
}

pub fn identity_bundle(jid: &str) -> CredentialBundle {
    CredentialBundle {
        jid: Some(jid.to_string()),
        keys: serde_json::json!({"noise": "material"}),
    }
}

/// Polls `cond` for up to two seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
