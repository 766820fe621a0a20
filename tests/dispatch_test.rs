mod common;

use common::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use wabridge::error::DispatchError;
use wabridge::store::MemoryStore;
use wabridge::transport::MediaPayload;
use wabridge::{Bridge, DispatchJob, Dispatcher, PacingPolicy};

const USER: &str = "user-1";

async fn ready_bridge(
    dir: &tempfile::TempDir,
) -> (Arc<ScriptedFactory>, Arc<Bridge>, Dispatcher) {
    init_logs();
    let store = Arc::new(MemoryStore::new());
    let factory = ScriptedFactory::new(Script::AutoOpen);
    let config = test_config("instance-a", dir.path());
    let numbers = config.numbers.clone();
    let bridge = Bridge::new(config, store, factory.clone());

    bridge.connect(USER).await.unwrap();
    wait_until("session strictly ready", || {
        bridge.registry().is_ready(USER)
    })
    .await;

    let dispatcher = Dispatcher::new(
        bridge.registry().clone(),
        PacingPolicy::immediate(),
        numbers,
    );
    (factory, bridge, dispatcher)
}

fn text_job(recipient: &str, template: &str) -> DispatchJob {
    DispatchJob {
        recipient: recipient.to_string(),
        template: template.to_string(),
        media: Vec::new(),
    }
}

#[tokio::test]
async fn test_send_one_normalizes_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _bridge, dispatcher) = ready_bridge(&dir).await;

    dispatcher
        .send_one(USER, "+1 (234) 567-8900", "hello", &[])
        .await
        .unwrap();

    let sent = factory.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "12345678900@s.whatsapp.net");
    assert_eq!(sent[0].body, "hello");
}

#[tokio::test]
async fn test_send_one_resolves_spintax() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _bridge, dispatcher) = ready_bridge(&dir).await;

    dispatcher
        .send_one(USER, "12345678900", "{Hi|Hello} there", &[])
        .await
        .unwrap();

    let sent = factory.sent_messages().await;
    assert!(["Hi there", "Hello there"].contains(&sent[0].body.as_str()));
}

#[tokio::test]
async fn test_not_ready_fails_fast_with_no_partial_work() {
    let dir = tempfile::tempdir().unwrap();
    init_logs();
    let store = Arc::new(MemoryStore::new());
    let factory = ScriptedFactory::new(Script::Silent);
    let config = test_config("instance-a", dir.path());
    let numbers = config.numbers.clone();
    let bridge = Bridge::new(config, store, factory.clone());
    let dispatcher = Dispatcher::new(
        bridge.registry().clone(),
        PacingPolicy::immediate(),
        numbers,
    );

    let jobs = vec![text_job("12345678900", "hi")];
    let result = dispatcher
        .send_batch(USER, &jobs, |_, _, _| async {})
        .await;

    assert!(matches!(result, Err(DispatchError::NotReady)));
    assert!(factory.sent_messages().await.is_empty());
}

#[tokio::test]
async fn test_batch_isolates_failures_and_reports_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _bridge, dispatcher) = ready_bridge(&dir).await;

    // Recipient #3 of 5 fails at the transport.
    factory.fail_sends_matching("15550000003");

    let jobs: Vec<DispatchJob> = (1..=5)
        .map(|i| text_job(&format!("1555000000{i}"), "hello"))
        .collect();

    let progress: Arc<Mutex<Vec<(usize, usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let records = dispatcher
        .send_batch(USER, &jobs, |sent, total, record| {
            let progress = progress.clone();
            async move {
                progress.lock().await.push((sent, total, record.success));
            }
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 5);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.recipient, jobs[i].recipient, "input order preserved");
        assert_eq!(record.success, i != 2, "only recipient #3 fails");
    }
    assert!(records[2].error.as_deref().unwrap().contains("send failed"));

    let progress = progress.lock().await;
    assert_eq!(progress.len(), 5, "one progress call per attempt");
    let sent_counts: Vec<usize> = progress.iter().map(|p| p.0).collect();
    assert_eq!(sent_counts, vec![1, 2, 2, 3, 4]);
    assert!(progress.iter().all(|p| p.1 == 5));
}

#[tokio::test]
async fn test_disconnect_mid_batch_records_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (_factory, bridge, dispatcher) = ready_bridge(&dir).await;

    let jobs: Vec<DispatchJob> = (1..=5)
        .map(|i| text_job(&format!("1555000000{i}"), "hello"))
        .collect();

    // Tear the session down after the second attempt; the rest of the batch
    // must fail the strict-readiness check, not vanish.
    let teardown = bridge.clone();
    let records = dispatcher
        .send_batch(USER, &jobs, move |sent, _total, _record| {
            let teardown = teardown.clone();
            async move {
                if sent == 2 {
                    teardown.shutdown_session(USER).await;
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 5);
    assert!(records[0].success && records[1].success);
    for record in &records[2..] {
        assert!(!record.success);
        assert!(
            record
                .error
                .as_deref()
                .unwrap()
                .contains("not fully established")
        );
    }
}

#[tokio::test]
async fn test_multi_media_caption_on_first_only() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _bridge, dispatcher) = ready_bridge(&dir).await;

    let media = vec![
        MediaPayload {
            reference: "upload/a.jpg".into(),
            mimetype: "image/jpeg".into(),
            filename: None,
        },
        MediaPayload {
            reference: "upload/b.pdf".into(),
            mimetype: "application/pdf".into(),
            filename: Some("b.pdf".into()),
        },
    ];
    dispatcher
        .send_one(USER, "12345678900", "the caption", &media)
        .await
        .unwrap();

    let sent = factory.sent_messages().await;
    assert_eq!(sent.len(), 2, "each attachment is its own send");
    assert_eq!(sent[0].media_ref.as_deref(), Some("upload/a.jpg"));
    assert_eq!(sent[0].body, "the caption");
    assert_eq!(sent[1].media_ref.as_deref(), Some("upload/b.pdf"));
    assert_eq!(sent[1].body, "", "only the first attachment carries the caption");
    assert_eq!(sent[0].to, sent[1].to);
}
