//! Notification dispatcher: acks, anti-spam suppression, batched summaries and
//! notified-state bookkeeping.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::RecordingTransport;
use meshnotes::config::GeocodingConfig;
use meshnotes::gateway::dispatch::{AckOutcome, DispatchConfig, NotificationDispatcher};
use meshnotes::geocode::Geocoder;
use meshnotes::i18n::I18n;
use meshnotes::mesh::MeshTransport;
use meshnotes::storage::{NoteState, Store};

fn dispatch_config(antispam_max: usize) -> DispatchConfig {
    DispatchConfig {
        max_frame_bytes: 230,
        antispam_window: Duration::from_secs(60),
        antispam_max,
        ack_part_delay: Duration::from_secs(0),
        response_part_delay: Duration::from_secs(0),
        reminder_interval: 5,
        dry_run: false,
    }
}

fn setup(
    antispam_max: usize,
) -> (
    tempfile::TempDir,
    Store,
    RecordingTransport,
    NotificationDispatcher<RecordingTransport>,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let transport = RecordingTransport::new();
    let dispatcher = NotificationDispatcher::new(
        transport.clone(),
        store.clone(),
        Geocoder::new(GeocodingConfig::default()),
        I18n::new("en"),
        dispatch_config(antispam_max),
    );
    (dir, store, transport, dispatcher)
}

fn queue_sent(store: &Store, node: &str, text: &str, note_id: i64) -> String {
    let queue_id = store
        .create_note(node, 4.6097, -74.0817, text, &text.to_lowercase())
        .unwrap();
    let url = format!("https://www.openstreetmap.org/note/{note_id}");
    store.mark_note_sent(&queue_id, note_id, &url).unwrap();
    queue_id
}

#[tokio::test]
async fn queued_ack_names_the_queue_id() {
    let (_dir, _store, transport, mut dispatcher) = setup(10);
    dispatcher
        .send_ack(
            "node1",
            AckOutcome::Queued {
                queue_id: "Q-000007".to_string(),
            },
        )
        .await;
    let messages = transport.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "node1");
    assert!(messages[0].1.contains("Q-000007"));
}

#[tokio::test]
async fn sent_notification_carries_note_id_and_marks_notified() {
    let (_dir, store, transport, mut dispatcher) = setup(10);
    let queue_id = queue_sent(&store, "node1", "broken bench", 4242);

    dispatcher.process_sent_notifications().await.unwrap();

    let messages = transport.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("4242"));
    assert!(messages[0].1.contains(&queue_id));

    let note = store.get_note_by_queue_id(&queue_id).unwrap().unwrap();
    assert_eq!(note.state, NoteState::Notified);
    assert!(note.notified_at.is_some());

    // A second pass finds nothing left to announce.
    dispatcher.process_sent_notifications().await.unwrap();
    assert_eq!(transport.messages().len(), 1);
}

#[tokio::test]
async fn throttled_device_gets_one_batched_summary() {
    let (_dir, store, transport, mut dispatcher) = setup(2);

    // Exhaust the anti-spam budget with acks.
    for i in 0..2 {
        dispatcher
            .send_ack(
                "node1",
                AckOutcome::Queued {
                    queue_id: format!("Q-00000{i}"),
                },
            )
            .await;
    }

    let a = queue_sent(&store, "node1", "first", 1);
    let b = queue_sent(&store, "node1", "second", 2);
    let c = queue_sent(&store, "node1", "third", 3);

    dispatcher.process_sent_notifications().await.unwrap();

    let messages = transport.messages();
    assert_eq!(messages.len(), 3, "2 acks + 1 summary");
    let summary = &messages[2].1;
    assert!(summary.contains('3'), "summary should carry the count: {summary}");
    assert!(!summary.contains("note 1"), "no individual notices while throttled");

    for queue_id in [&a, &b, &c] {
        let note = store.get_note_by_queue_id(queue_id).unwrap().unwrap();
        assert_eq!(note.state, NoteState::Notified);
    }
}

#[tokio::test]
async fn suppressed_ack_sends_nothing() {
    let (_dir, _store, transport, mut dispatcher) = setup(1);
    dispatcher
        .send_ack(
            "node1",
            AckOutcome::Queued {
                queue_id: "Q-000001".to_string(),
            },
        )
        .await;
    dispatcher
        .send_ack(
            "node1",
            AckOutcome::Queued {
                queue_id: "Q-000002".to_string(),
            },
        )
        .await;
    assert_eq!(transport.messages().len(), 1);
}

#[tokio::test]
async fn anti_spam_windows_are_per_device() {
    let (_dir, store, transport, mut dispatcher) = setup(1);
    queue_sent(&store, "node1", "first", 1);
    queue_sent(&store, "node2", "second", 2);

    dispatcher.process_sent_notifications().await.unwrap();

    let messages = transport.messages();
    assert_eq!(messages.len(), 2);
    let mut nodes: Vec<&str> = messages.iter().map(|(n, _)| n.as_str()).collect();
    nodes.sort();
    assert_eq!(nodes, vec!["node1", "node2"]);
}

#[tokio::test]
async fn failed_notification_names_count_and_error() {
    let (_dir, store, transport, mut dispatcher) = setup(10);
    let queue_id = store
        .create_note("node1", 4.6097, -74.0817, "broken bench", "broken bench")
        .unwrap();
    store
        .mark_note_failed(&queue_id, "Giving up after 5 failed attempts.")
        .unwrap();

    dispatcher.process_failed_notifications().await.unwrap();

    let messages = transport.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains('1'));
    assert!(messages[0].1.contains("Giving up"));

    // Failed entries keep their state but stop being re-announced.
    let note = store.get_note_by_queue_id(&queue_id).unwrap().unwrap();
    assert_eq!(note.state, NoteState::Failed);
    assert!(note.notified_at.is_some());

    dispatcher.process_failed_notifications().await.unwrap();
    assert_eq!(transport.messages().len(), 1);
}

#[tokio::test]
async fn part_failure_aborts_and_leaves_entry_unnotified() {
    let (_dir, store, transport, mut dispatcher) = setup(10);
    let queue_id = queue_sent(&store, "node1", "broken bench", 4242);
    *transport.fail.lock().unwrap() = true;

    dispatcher.process_sent_notifications().await.unwrap();

    let note = store.get_note_by_queue_id(&queue_id).unwrap().unwrap();
    assert_eq!(note.state, NoteState::Sent);
    assert!(note.notified_at.is_none());

    // Transport recovers; the next pass delivers it.
    *transport.fail.lock().unwrap() = false;
    dispatcher.process_sent_notifications().await.unwrap();
    let note = store.get_note_by_queue_id(&queue_id).unwrap().unwrap();
    assert_eq!(note.state, NoteState::Notified);
}

/// Delivers only the very first part it is asked to send, then fails.
struct FirstCallOnlyTransport {
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl MeshTransport for FirstCallOnlyTransport {
    async fn send_direct_message(&mut self, _node_id: &str, _text: &str) -> bool {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        *calls == 1
    }
}

#[tokio::test]
async fn aborted_multi_part_send_still_counts_toward_anti_spam() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let mut config = dispatch_config(1);
    config.max_frame_bytes = 32;
    let mut dispatcher = NotificationDispatcher::new(
        FirstCallOnlyTransport {
            calls: calls.clone(),
        },
        store,
        Geocoder::new(GeocodingConfig::default()),
        I18n::new("en"),
        config,
    );

    // Long enough to segment; part 1 reaches the device, part 2 fails.
    let text = "trail blocked by fallen tree ".repeat(5);
    dispatcher
        .send_ack("node1", AckOutcome::Reject { text })
        .await;
    assert_eq!(*calls.lock().unwrap(), 2);

    // The delivered first part counts toward the window, so the next DM to the
    // same device is suppressed rather than sent.
    dispatcher.send_ack("node1", AckOutcome::Duplicate).await;
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn fifth_accepted_report_carries_privacy_reminder() {
    let (_dir, store, transport, mut dispatcher) = setup(100);

    for i in 1..=5 {
        let queue_id = store
            .create_note(
                "node1",
                4.6097,
                -74.0817,
                &format!("report {i}"),
                &format!("report {i}"),
            )
            .unwrap();
        dispatcher
            .send_ack("node1", AckOutcome::Queued { queue_id })
            .await;
    }

    let messages = transport.messages();
    assert_eq!(messages.len(), 5);
    let reminder_needle = "public";
    for (i, (_, text)) in messages.iter().enumerate() {
        if i == 4 {
            assert!(
                text.contains(reminder_needle),
                "5th ack should carry the reminder: {text}"
            );
        } else {
            assert!(!text.contains(reminder_needle), "ack {}: {text}", i + 1);
        }
    }
}
