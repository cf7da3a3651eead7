use std::sync::Arc;

use super::*;
use crate::store::memory::MemoryStore;
use crate::store::memory::test_helpers::chat_message;
use tokio::time::{Duration, sleep};

fn identity() -> Identity {
    Identity {
        id: "u1".into(),
        email: "a@x.com".into(),
        display_name: "Ann".into(),
        picture_url: Some("https://example.com/ann.png".into()),
    }
}

fn engine_on(backend: &Arc<MemoryStore>) -> ChatEngine {
    ChatEngine::new(
        Arc::clone(backend) as Arc<dyn DocumentStore>,
        Arc::clone(backend) as Arc<dyn BlobStore>,
        Some(identity()),
    )
}

fn png(len: usize) -> AttachmentFile {
    AttachmentFile { name: "beach day.png".into(), content_type: "image/png".into(), bytes: vec![0u8; len] }
}

async fn wait_for(engine: &ChatEngine, pred: impl Fn(&ChatSnapshot) -> bool) -> ChatSnapshot {
    for _ in 0..50 {
        let snapshot = engine.snapshot().await;
        if pred(&snapshot) {
            return snapshot;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never reached expected state: {:?}", engine.snapshot().await);
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

// =============================================================================
// LIVE MODE
// =============================================================================

#[tokio::test]
async fn open_establishes_live_subscription_with_initial_snapshot() {
    let backend = Arc::new(MemoryStore::new());
    backend.seed_message(chat_message("m1", "trip-1", Some(100))).await;
    backend.seed_message(chat_message("m2", "trip-1", Some(200))).await;

    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    assert_eq!(engine.mode().await, PanelMode::Live);
    let snapshot = wait_for(&engine, |s| s.messages.len() == 2).await;
    let ids: Vec<_> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);
}

#[tokio::test]
async fn live_pushes_replace_the_list_wholesale() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    backend.seed_message(chat_message("m1", "trip-1", Some(100))).await;
    wait_for(&engine, |s| s.messages.len() == 1).await;

    backend.seed_message(chat_message("m0", "trip-1", Some(50))).await;
    let snapshot = wait_for(&engine, |s| s.messages.len() == 2).await;
    let ids: Vec<_> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m0", "m1"], "push snapshots arrive ordered ascending");
}

#[tokio::test]
async fn live_send_relies_on_the_push_and_never_echoes() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    engine.set_compose_text("hello").await;
    let id = engine.send().await.unwrap();

    let snapshot = wait_for(&engine, |s| s.messages.len() == 1).await;
    assert_eq!(snapshot.messages[0].id, id, "exactly one copy of the logical send");
    assert_eq!(snapshot.messages[0].text, "hello");
    assert_eq!(snapshot.messages[0].sender.id, "u1");
    assert!(snapshot.compose_text.is_empty(), "draft cleared after the write");

    // No duplicate sneaks in later.
    settle().await;
    assert_eq!(engine.messages().await.len(), 1);
}

#[tokio::test]
async fn messages_from_other_trips_are_never_applied() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    backend.seed_message(chat_message("m-other", "trip-2", Some(100))).await;
    settle().await;
    assert!(engine.messages().await.is_empty());
}

// =============================================================================
// DEGRADED MODE
// =============================================================================

#[tokio::test]
async fn capability_refusal_on_open_degrades_and_sorts_client_side() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    backend.seed_message(chat_message("m-late", "trip-1", Some(200))).await;
    backend.seed_message(chat_message("m-early", "trip-1", Some(100))).await;
    backend.seed_message(chat_message("m-pending", "trip-1", None)).await;

    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    assert_eq!(engine.mode().await, PanelMode::Degraded);
    let ids: Vec<_> = engine.messages().await.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, ["m-early", "m-late", "m-pending"], "ascending with timestamp-less last");
}

#[tokio::test]
async fn capability_loss_mid_live_degrades_one_way() {
    let backend = Arc::new(MemoryStore::new());
    backend.seed_message(chat_message("m1", "trip-1", Some(100))).await;

    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    wait_for(&engine, |s| s.messages.len() == 1).await;

    backend
        .emit_message_lost(StoreError::MissingIndex { description: "index dropped".into() })
        .await;
    wait_for(&engine, |s| s.mode == PanelMode::Degraded).await;

    // The fallback fetch keeps serving the data.
    assert_eq!(engine.messages().await.len(), 1);
}

#[tokio::test]
async fn degraded_send_appends_exactly_one_echo_at_the_tail() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    backend.seed_message(chat_message("m1", "trip-1", Some(100))).await;

    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    assert_eq!(engine.mode().await, PanelMode::Degraded);

    engine.set_compose_text("hello").await;
    let id = engine.send().await.unwrap();

    let messages = engine.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages.last().unwrap().id, id, "new message lands at a non-decreasing position");
    assert!(messages.last().unwrap().created_at.is_some());
    assert!(engine.snapshot().await.compose_text.is_empty());
}

#[tokio::test]
async fn degraded_send_of_identical_content_produces_two_messages() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;

    engine.set_compose_text("same words").await;
    let first = engine.send().await.unwrap();
    engine.set_compose_text("same words").await;
    let second = engine.send().await.unwrap();

    assert_ne!(first, second);
    let messages = engine.messages().await;
    assert_eq!(messages.len(), 2, "no dedup by content");
    assert!(messages.iter().all(|m| m.text == "same words"));
}

#[test]
fn stale_live_push_is_refused_once_degraded() {
    let mut state = PanelState::new();
    state.trip_id = Some("trip-1".into());
    state.mode = PanelMode::Degraded;
    state.messages = vec![chat_message("m1", "trip-1", Some(100))];
    let epoch = state.epoch;

    let applied = apply_live_push(&mut state, epoch, vec![chat_message("stray", "trip-1", Some(999))]);
    assert!(!applied, "a live push must not land on a degraded panel");
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].id, "m1");
}

#[test]
fn push_from_a_released_subscription_epoch_is_refused() {
    let mut state = PanelState::new();
    state.mode = PanelMode::Live;
    let stale_epoch = state.epoch;
    state.teardown();
    state.mode = PanelMode::Live;

    let applied = apply_live_push(&mut state, stale_epoch, vec![chat_message("stray", "trip-1", Some(1))]);
    assert!(!applied);
    assert!(state.messages.is_empty());
}

#[test]
fn local_echo_with_an_already_known_id_is_skipped() {
    let mut state = PanelState::new();
    state.messages = vec![chat_message("m1", "trip-1", Some(100))];

    append_local_echo(&mut state, chat_message("m1", "trip-1", Some(999)));
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].created_at, Some(100), "the first copy wins");

    append_local_echo(&mut state, chat_message("m2", "trip-1", Some(200)));
    assert_eq!(state.messages.len(), 2);
}

#[tokio::test]
async fn reopening_a_panel_attempts_live_again() {
    let backend = Arc::new(MemoryStore::new());
    backend.seed_message(chat_message("m1", "trip-1", Some(100))).await;

    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    backend
        .emit_message_lost(StoreError::MissingIndex { description: "index dropped".into() })
        .await;
    wait_for(&engine, |s| s.mode == PanelMode::Degraded).await;

    engine.close().await;
    assert_eq!(engine.mode().await, PanelMode::Idle);

    engine.open("trip-1").await;
    assert_eq!(engine.mode().await, PanelMode::Live, "a fresh panel instance tries live first");
    wait_for(&engine, |s| s.messages.len() == 1).await;
}

// =============================================================================
// SEND VALIDATION
// =============================================================================

#[tokio::test]
async fn send_requires_identity() {
    let backend = Arc::new(MemoryStore::new());
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn DocumentStore>,
        Arc::clone(&backend) as Arc<dyn BlobStore>,
        None,
    );
    engine.open("trip-1").await;
    engine.set_compose_text("hello").await;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::NotSignedIn));
    assert!(backend.fetch_messages("trip-1").await.unwrap().is_empty(), "nothing written");
}

#[tokio::test]
async fn send_requires_an_open_panel() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.set_compose_text("hello").await;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::PanelClosed));
}

#[tokio::test]
async fn send_rejects_whitespace_only_draft_without_attachment() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("   \n\t ").await;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
    assert!(backend.fetch_messages("trip-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn send_rejects_second_call_while_one_is_in_flight() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("hello").await;
    engine.inner.write().await.sending = true;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::SendInFlight));
}

#[tokio::test]
async fn oversize_attachment_is_rejected_with_zero_upload_attempts() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("look at this").await;
    engine.select_attachment(png(SEND_MAX_BYTES + 1)).await.unwrap();

    let err = engine.send().await.unwrap_err();
    let ChatError::AttachmentTooLarge { cap_bytes, .. } = err else {
        panic!("expected attachment cap error, got {err}");
    };
    assert_eq!(cap_bytes, SEND_MAX_BYTES);
    assert_eq!(backend.blob_count().await, 0, "no network call for an oversize attachment");
    assert!(backend.fetch_messages("trip-1").await.unwrap().is_empty());
    assert!(engine.snapshot().await.has_attachment, "selection survives the rejection");
}

#[tokio::test]
async fn selection_rejects_files_over_the_softer_cap() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);

    let err = engine.select_attachment(png(SELECT_MAX_BYTES + 1)).await.unwrap_err();
    let ChatError::AttachmentTooLarge { cap_bytes, .. } = err else {
        panic!("expected attachment cap error, got {err}");
    };
    assert_eq!(cap_bytes, SELECT_MAX_BYTES);
    assert!(!engine.snapshot().await.has_attachment);
}

#[tokio::test]
async fn clear_attachment_drops_the_selection() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.select_attachment(png(1024)).await.unwrap();
    assert!(engine.snapshot().await.has_attachment);

    engine.clear_attachment().await;
    assert!(!engine.snapshot().await.has_attachment);
}

// =============================================================================
// SEND FAILURES
// =============================================================================

#[tokio::test]
async fn upload_failure_aborts_the_send_without_writing() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("with picture").await;
    engine.select_attachment(png(1024)).await.unwrap();
    backend.fail_next_upload().await;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::Upload(_)));
    assert!(backend.fetch_messages("trip-1").await.unwrap().is_empty(), "no partial message");

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.compose_text, "with picture", "draft intact after a failed send");
    assert!(snapshot.has_attachment);
    assert!(!snapshot.sending, "the single-flight slot is released");
}

#[tokio::test]
async fn write_failure_keeps_the_draft_and_adds_no_echo() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("hello").await;
    backend.fail_next_write().await;

    let err = engine.send().await.unwrap_err();
    assert!(matches!(err, ChatError::Store(_)));
    assert!(engine.messages().await.is_empty());
    assert_eq!(engine.snapshot().await.compose_text, "hello");
}

// =============================================================================
// SCENARIO: DEGRADED SEND WITH ATTACHMENT
// =============================================================================

#[tokio::test]
async fn degraded_send_with_one_mebibyte_image_uploads_writes_and_echoes() {
    let backend = Arc::new(MemoryStore::new().without_chat_index());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    assert_eq!(engine.mode().await, PanelMode::Degraded);

    engine.set_compose_text("hello").await;
    engine.select_attachment(png(1024 * 1024)).await.unwrap();
    let id = engine.send().await.unwrap();

    assert_eq!(backend.blob_count().await, 1, "upload happened exactly once");

    let written = backend.fetch_messages("trip-1").await.unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].id, id);
    assert_eq!(written[0].text, "hello");
    let url = written[0].image_url.as_deref().expect("message carries the attachment URL");
    assert!(url.starts_with("memory://chat-images/trip-1/"));

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, id);
    assert!(snapshot.messages[0].created_at.is_some(), "echo carries a client timestamp");
    assert!(snapshot.compose_text.is_empty(), "draft cleared only after the write succeeded");
    assert!(!snapshot.has_attachment);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn close_releases_the_subscription_and_clears_the_panel() {
    let backend = Arc::new(MemoryStore::new());
    let engine = engine_on(&backend);
    engine.open("trip-1").await;
    engine.set_compose_text("draft").await;

    engine.close().await;
    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.mode, PanelMode::Idle);
    assert!(snapshot.trip_id.is_none());
    assert!(snapshot.compose_text.is_empty());

    backend.seed_message(chat_message("m-late", "trip-1", Some(100))).await;
    settle().await;
    assert!(engine.messages().await.is_empty(), "no push lands after close");
}

#[tokio::test]
async fn switching_trips_swaps_the_message_list() {
    let backend = Arc::new(MemoryStore::new());
    backend.seed_message(chat_message("m-a", "trip-a", Some(100))).await;
    backend.seed_message(chat_message("m-b", "trip-b", Some(200))).await;

    let engine = engine_on(&backend);
    engine.open("trip-a").await;
    wait_for(&engine, |s| s.messages.len() == 1).await;

    engine.open("trip-b").await;
    let snapshot = wait_for(&engine, |s| s.messages.first().is_some_and(|m| m.id == "m-b")).await;
    assert_eq!(snapshot.messages.len(), 1);

    // A push for the old trip no longer reaches this panel.
    backend.seed_message(chat_message("m-a2", "trip-a", Some(300))).await;
    settle().await;
    let ids: Vec<_> = engine.messages().await.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, ["m-b"]);
}
