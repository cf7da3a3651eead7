//! Chat sync engine — a live, gap-free message stream for one trip panel.
//!
//! DESIGN
//! ======
//! Each panel runs an explicit mode machine: `Idle` (closed) →
//! `LiveAttempt` (subscription being established) → `Live` (pushes replace
//! the list wholesale) or `Degraded` (the backend cannot serve the
//! filtered+ordered query; the engine falls back to filter-only one-shot
//! fetches sorted client-side). Degrading is one-way for the lifetime of an
//! open panel; reopening attempts Live again.
//!
//! Sends are single-flight per panel. While degraded, a just-sent message
//! is echoed locally with a client timestamp because no push will deliver
//! it; while live, the push carries the authoritative copy and no echo is
//! added, so the list never holds two entries for one logical send.
//!
//! ERROR HANDLING
//! ==============
//! Capability errors degrade the panel and are not surfaced as failures.
//! Transport and validation errors come back on the `send` result with no
//! side effects: the compose draft and attachment selection survive a
//! failed send and are cleared only after the write lands.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chat::upload::{self, AttachmentFile, SELECT_MAX_BYTES, SEND_MAX_BYTES, UploadError};
use crate::store::{
    BlobStore, DocumentStore, SnapshotEvent, StoreError, Subscription, subscription_queue_capacity,
};
use crate::types::{ChatMessage, Identity, MessageSender, NewMessage, now_ms, sort_messages_ascending};

/// Panel lifecycle mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PanelMode {
    /// Panel closed; no subscription held.
    #[default]
    Idle,
    /// Panel opened; live subscription being established.
    LiveAttempt,
    /// Live subscription active; pushes replace the list wholesale.
    Live,
    /// Fallback: filter-only fetches, client-side sort. One-way per panel.
    Degraded,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Writes require an authenticated identity.
    #[error("not signed in")]
    NotSignedIn,
    /// No trip panel is open.
    #[error("no open chat panel")]
    PanelClosed,
    /// Empty/whitespace text and no attachment selected.
    #[error("nothing to send")]
    EmptyMessage,
    /// A send for this panel is already running.
    #[error("a send is already in flight")]
    SendInFlight,
    /// The attachment exceeds the applicable size cap.
    #[error("attachment is {size_bytes} bytes; the cap is {cap_bytes}")]
    AttachmentTooLarge { size_bytes: usize, cap_bytes: usize },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct PanelState {
    trip_id: Option<String>,
    mode: PanelMode,
    messages: Vec<ChatMessage>,
    compose_text: String,
    attachment: Option<AttachmentFile>,
    sending: bool,
    /// Bumped on every teardown; every apply path checks it so a stale
    /// push from a released subscription is never applied.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl PanelState {
    fn new() -> Self {
        Self {
            trip_id: None,
            mode: PanelMode::Idle,
            messages: Vec::new(),
            compose_text: String::new(),
            attachment: None,
            sending: false,
            epoch: 0,
            task: None,
        }
    }

    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Apply a live push. Refused unless the push belongs to the active
/// subscription epoch and the panel is still in `Live` mode.
fn apply_live_push(state: &mut PanelState, epoch: u64, messages: Vec<ChatMessage>) -> bool {
    if state.epoch != epoch || state.mode != PanelMode::Live {
        return false;
    }
    // Pushes arrive already ordered; applied wholesale, never reordered.
    state.messages = messages;
    true
}

/// Append the degraded-mode local echo, skipping ids already present.
fn append_local_echo(state: &mut PanelState, echo: ChatMessage) {
    if state.messages.iter().any(|m| m.id == echo.id) {
        return;
    }
    state.messages.push(echo);
}

/// Read-only view handed to UI consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub trip_id: Option<String>,
    pub mode: PanelMode,
    pub messages: Vec<ChatMessage>,
    pub compose_text: String,
    pub has_attachment: bool,
    pub sending: bool,
}

/// Per-trip chat panel engine.
pub struct ChatEngine {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    identity: Option<Identity>,
    inner: Arc<RwLock<PanelState>>,
}

impl ChatEngine {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>, identity: Option<Identity>) -> Self {
        Self { store, blobs, identity, inner: Arc::new(RwLock::new(PanelState::new())) }
    }

    /// Open the panel for `trip_id` and attempt a live subscription.
    ///
    /// On a capability refusal the panel degrades immediately; other
    /// establishment failures are logged and leave an empty list. Opening
    /// releases any previous panel first — at most one subscription is
    /// active at a time.
    pub async fn open(&self, trip_id: &str) {
        let epoch = {
            let mut state = self.inner.write().await;
            state.teardown();
            state.trip_id = Some(trip_id.to_owned());
            state.messages.clear();
            state.mode = PanelMode::LiveAttempt;
            state.epoch
        };

        match self.store.subscribe_messages(trip_id, subscription_queue_capacity()).await {
            Ok(subscription) => {
                let mut state = self.inner.write().await;
                if state.epoch != epoch {
                    return;
                }
                info!(subscription = %subscription.id, trip_id, "live message subscription established");
                state.mode = PanelMode::Live;
                state.task = Some(tokio::spawn(apply_loop(
                    Arc::clone(&self.store),
                    Arc::clone(&self.inner),
                    trip_id.to_owned(),
                    epoch,
                    subscription,
                )));
            }
            Err(e) if e.is_capability() => {
                info!(error = %e, trip_id, "ordered message query unsupported; degrading to one-shot fetches");
                enter_degraded(self.store.as_ref(), &self.inner, trip_id, epoch, None).await;
            }
            Err(e) => {
                warn!(error = %e, trip_id, "message subscription failed");
            }
        }
    }

    /// Close the panel and release its subscription. Safe when idle.
    pub async fn close(&self) {
        let mut state = self.inner.write().await;
        state.teardown();
        state.trip_id = None;
        state.mode = PanelMode::Idle;
        state.messages.clear();
        state.compose_text.clear();
        state.attachment = None;
        state.sending = false;
    }

    /// Replace the compose draft.
    pub async fn set_compose_text(&self, text: &str) {
        self.inner.write().await.compose_text = text.to_owned();
    }

    /// Select an attachment for the next send.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::AttachmentTooLarge`] over the selection cap.
    pub async fn select_attachment(&self, file: AttachmentFile) -> Result<(), ChatError> {
        if file.size() > SELECT_MAX_BYTES {
            return Err(ChatError::AttachmentTooLarge { size_bytes: file.size(), cap_bytes: SELECT_MAX_BYTES });
        }
        self.inner.write().await.attachment = Some(file);
        Ok(())
    }

    /// Drop the selected attachment.
    pub async fn clear_attachment(&self) {
        self.inner.write().await.attachment = None;
    }

    /// Send the current draft (text and/or attachment) to the open panel.
    ///
    /// Returns the new message id. The compose draft is cleared only after
    /// the write succeeds; validation failures have no side effects at all.
    ///
    /// # Errors
    ///
    /// Validation errors (`NotSignedIn`, `PanelClosed`, `EmptyMessage`,
    /// `SendInFlight`, `AttachmentTooLarge`) are returned before any
    /// network call; upload and store failures abort the send with the
    /// draft intact.
    pub async fn send(&self) -> Result<String, ChatError> {
        // PHASE: VALIDATE AND CLAIM THE SINGLE FLIGHT
        let (trip_id, epoch, text, attachment, sender) = {
            let mut state = self.inner.write().await;
            if state.sending {
                return Err(ChatError::SendInFlight);
            }
            let Some(identity) = &self.identity else {
                return Err(ChatError::NotSignedIn);
            };
            let Some(trip_id) = state.trip_id.clone() else {
                return Err(ChatError::PanelClosed);
            };
            let text = state.compose_text.trim().to_owned();
            let attachment = state.attachment.clone();
            if text.is_empty() && attachment.is_none() {
                return Err(ChatError::EmptyMessage);
            }
            if let Some(file) = &attachment {
                if file.size() > SEND_MAX_BYTES {
                    return Err(ChatError::AttachmentTooLarge {
                        size_bytes: file.size(),
                        cap_bytes: SEND_MAX_BYTES,
                    });
                }
            }
            state.sending = true;
            (trip_id, state.epoch, text, attachment, identity.sender_snapshot())
        };

        let result = self.send_inner(&trip_id, epoch, text, attachment, sender).await;
        self.inner.write().await.sending = false;
        result
    }

    async fn send_inner(
        &self,
        trip_id: &str,
        epoch: u64,
        text: String,
        attachment: Option<AttachmentFile>,
        sender: MessageSender,
    ) -> Result<String, ChatError> {
        // PHASE: UPLOAD BEFORE WRITE
        // An upload failure aborts the send; no partial message is written.
        let image_url = match &attachment {
            Some(file) => Some(upload::upload_attachment(self.blobs.as_ref(), trip_id, file).await?),
            None => None,
        };

        let payload = NewMessage { trip_id: trip_id.to_owned(), text, image_url, sender };
        let id = self.store.create_message(payload.clone()).await?;
        info!(%id, trip_id, "message written");

        // PHASE: ECHO AND CLEAR THE DRAFT
        let echo = {
            let mut state = self.inner.write().await;
            if state.epoch != epoch {
                // Panel was closed or switched mid-send; the write stands,
                // but this panel instance no longer owns the draft.
                return Ok(id);
            }
            let echo = if state.mode == PanelMode::Degraded {
                let echo = ChatMessage {
                    id: id.clone(),
                    trip_id: payload.trip_id.clone(),
                    text: payload.text.clone(),
                    image_url: payload.image_url.clone(),
                    sender: payload.sender.clone(),
                    created_at: Some(now_ms()),
                };
                append_local_echo(&mut state, echo.clone());
                Some(echo)
            } else {
                None
            };
            state.compose_text.clear();
            state.attachment = None;
            echo
        };

        // Degraded panels get no push; repeat the one-shot fetch so the
        // list converges on authoritative data, keeping the echo if the
        // store has not caught up yet.
        if echo.is_some() {
            refetch_degraded(self.store.as_ref(), &self.inner, trip_id, epoch, echo).await;
        }
        Ok(id)
    }

    /// Current panel mode.
    pub async fn mode(&self) -> PanelMode {
        self.inner.read().await.mode
    }

    /// Ordered message list, cloned for the UI.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.read().await.messages.clone()
    }

    /// Read-only snapshot of the whole panel.
    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.inner.read().await;
        ChatSnapshot {
            trip_id: state.trip_id.clone(),
            mode: state.mode,
            messages: state.messages.clone(),
            compose_text: state.compose_text.clone(),
            has_attachment: state.attachment.is_some(),
            sending: state.sending,
        }
    }
}

async fn apply_loop(
    store: Arc<dyn DocumentStore>,
    inner: Arc<RwLock<PanelState>>,
    trip_id: String,
    epoch: u64,
    mut subscription: Subscription<ChatMessage>,
) {
    while let Some(event) = subscription.events.recv().await {
        match event {
            SnapshotEvent::Snapshot(messages) => {
                let mut state = inner.write().await;
                if !apply_live_push(&mut state, epoch, messages) {
                    return;
                }
            }
            SnapshotEvent::Lost(err) if err.is_capability() => {
                info!(error = %err, %trip_id, "live subscription reported a capability gap; degrading");
                enter_degraded(store.as_ref(), &inner, &trip_id, epoch, None).await;
                return;
            }
            SnapshotEvent::Lost(err) => {
                warn!(error = %err, %trip_id, "message subscription lost");
                return;
            }
        }
    }
}

/// Flip the panel to `Degraded` (one-way) and run the fallback fetch.
async fn enter_degraded(
    store: &dyn DocumentStore,
    inner: &RwLock<PanelState>,
    trip_id: &str,
    epoch: u64,
    keep: Option<ChatMessage>,
) {
    {
        let mut state = inner.write().await;
        if state.epoch != epoch {
            return;
        }
        state.mode = PanelMode::Degraded;
    }
    refetch_degraded(store, inner, trip_id, epoch, keep).await;
}

/// One-shot filter-only fetch, sorted client-side (pending timestamps
/// last). `keep` re-appends a just-sent echo the fetch has not observed
/// yet, so an eventually-consistent read never drops the user's message.
async fn refetch_degraded(
    store: &dyn DocumentStore,
    inner: &RwLock<PanelState>,
    trip_id: &str,
    epoch: u64,
    keep: Option<ChatMessage>,
) {
    match store.fetch_messages(trip_id).await {
        Ok(mut messages) => {
            sort_messages_ascending(&mut messages);
            let mut state = inner.write().await;
            if state.epoch != epoch || state.mode != PanelMode::Degraded {
                return;
            }
            state.messages = messages;
            if let Some(echo) = keep {
                append_local_echo(&mut state, echo);
            }
        }
        Err(e) => {
            warn!(error = %e, trip_id, "degraded message fetch failed");
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
