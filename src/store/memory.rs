//! In-memory reference backend for both store contracts.
//!
//! DESIGN
//! ======
//! Collections live behind one `RwLock`; every mutation recomputes the full
//! result set for each matching subscriber and pushes it as a wholesale
//! snapshot (`try_send`, never blocking the writer). Closed receivers are
//! pruned on the next broadcast.
//!
//! Managed document stores serve filtered+ordered queries only when a
//! matching composite index exists. The `without_*_index` builders model
//! that gap: the ordered subscription refuses with `MissingIndex` while the
//! filter-only fetch keeps working, which is exactly the degradation the
//! consuming stores must survive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use crate::store::{BlobStore, DocumentStore, SnapshotEvent, StoreError, Subscription};
use crate::types::{
    ChatMessage, NewMessage, NewNotification, Notification, now_ms, sort_messages_ascending,
    sort_notifications_descending,
};

struct NotificationSub {
    email: String,
    tx: mpsc::Sender<SnapshotEvent<Notification>>,
}

struct MessageSub {
    trip_id: String,
    tx: mpsc::Sender<SnapshotEvent<ChatMessage>>,
}

struct StoredBlob {
    content_type: String,
    len: usize,
}

#[derive(Default)]
struct Collections {
    notifications: HashMap<String, Notification>,
    messages: Vec<ChatMessage>,
    blobs: HashMap<String, StoredBlob>,
    notification_subs: HashMap<Uuid, NotificationSub>,
    message_subs: HashMap<Uuid, MessageSub>,
    /// Last timestamp handed out; keeps server timestamps strictly
    /// increasing even when two writes land in the same millisecond.
    last_ts: i64,
    #[cfg(test)]
    fail_next_write: bool,
    #[cfg(test)]
    fail_next_upload: bool,
}

impl Collections {
    fn next_server_ts(&mut self) -> i64 {
        let ts = now_ms().max(self.last_ts + 1);
        self.last_ts = ts;
        ts
    }

    fn notifications_for(&self, email: &str, limit: Option<usize>) -> Vec<Notification> {
        let mut list: Vec<Notification> = self
            .notifications
            .values()
            .filter(|n| n.recipient_email == email)
            .cloned()
            .collect();
        sort_notifications_descending(&mut list);
        if let Some(limit) = limit {
            list.truncate(limit);
        }
        list
    }

    fn messages_for(&self, trip_id: &str) -> Vec<ChatMessage> {
        // Insertion order on purpose: this is the filter-only query.
        self.messages.iter().filter(|m| m.trip_id == trip_id).cloned().collect()
    }

    fn messages_for_ordered(&self, trip_id: &str) -> Vec<ChatMessage> {
        let mut list = self.messages_for(trip_id);
        sort_messages_ascending(&mut list);
        list
    }

    fn broadcast_notifications(&mut self, email: &str) {
        let mut closed = Vec::new();
        for (sub_id, sub) in &self.notification_subs {
            if sub.email != email {
                continue;
            }
            let snapshot = self.notifications_for(email, None);
            match sub.tx.try_send(SnapshotEvent::Snapshot(snapshot)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%sub_id, "notification subscriber queue full; snapshot skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*sub_id),
            }
        }
        for sub_id in closed {
            self.notification_subs.remove(&sub_id);
        }
    }

    fn broadcast_messages(&mut self, trip_id: &str) {
        let mut closed = Vec::new();
        for (sub_id, sub) in &self.message_subs {
            if sub.trip_id != trip_id {
                continue;
            }
            let snapshot = self.messages_for_ordered(trip_id);
            match sub.tx.try_send(SnapshotEvent::Snapshot(snapshot)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%sub_id, "message subscriber queue full; snapshot skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*sub_id),
            }
        }
        for sub_id in closed {
            self.message_subs.remove(&sub_id);
        }
    }

    #[cfg(test)]
    fn take_write_fault(&mut self) -> Result<(), StoreError> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(StoreError::Unavailable { reason: "injected write failure".into() });
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn take_write_fault(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory document + blob store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
    notification_index: bool,
    chat_index: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A fully indexed backend: every contract query is served.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Collections::default())), notification_index: true, chat_index: true }
    }

    /// Drop the `(trip_id, created_at)` composite index: ordered message
    /// subscriptions refuse, the filter-only fetch still works.
    #[must_use]
    pub fn without_chat_index(mut self) -> Self {
        self.chat_index = false;
        self
    }

    /// Drop the `(recipient_email, created_at)` composite index: the
    /// notification subscription refuses, one-shot lists still work.
    #[must_use]
    pub fn without_notification_index(mut self) -> Self {
        self.notification_index = false;
        self
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_notification(&self, new: NewNotification) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        inner.take_write_fault()?;
        let id = Uuid::new_v4().to_string();
        let created_at = inner.next_server_ts();
        let notification = Notification {
            id: id.clone(),
            recipient_email: new.recipient_email.clone(),
            trip_id: new.trip_id,
            message: new.message,
            kind: new.kind,
            destination: new.destination,
            read: false,
            created_at: Some(created_at),
        };
        inner.notifications.insert(id.clone(), notification);
        inner.broadcast_notifications(&new.recipient_email);
        Ok(id)
    }

    async fn list_notifications(&self, email: &str, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.notifications_for(email, Some(limit)))
    }

    async fn list_unread_notifications(&self, email: &str) -> Result<Vec<Notification>, StoreError> {
        let inner = self.inner.read().await;
        let mut list: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.recipient_email == email && !n.read)
            .cloned()
            .collect();
        sort_notifications_descending(&mut list);
        Ok(list)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.take_write_fault()?;
        let Some(notification) = inner.notifications.get_mut(id) else {
            return Err(StoreError::NotFound { id: id.to_owned() });
        };
        if notification.read {
            return Ok(());
        }
        notification.read = true;
        let email = notification.recipient_email.clone();
        inner.broadcast_notifications(&email);
        Ok(())
    }

    async fn subscribe_notifications(
        &self,
        email: &str,
        capacity: usize,
    ) -> Result<Subscription<Notification>, StoreError> {
        if !self.notification_index {
            return Err(StoreError::MissingIndex {
                description: "notifications requires a composite index on (recipient_email, created_at)".into(),
            });
        }
        let mut inner = self.inner.write().await;
        let (tx, events) = mpsc::channel(capacity.max(1));
        let initial = inner.notifications_for(email, None);
        // Capacity is at least one, so the initial snapshot always fits.
        let _ = tx.try_send(SnapshotEvent::Snapshot(initial));
        let id = Uuid::new_v4();
        inner.notification_subs.insert(id, NotificationSub { email: email.to_owned(), tx });
        Ok(Subscription { id, events })
    }

    async fn create_message(&self, new: NewMessage) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        inner.take_write_fault()?;
        let id = Uuid::new_v4().to_string();
        let created_at = inner.next_server_ts();
        let message = ChatMessage {
            id: id.clone(),
            trip_id: new.trip_id.clone(),
            text: new.text,
            image_url: new.image_url,
            sender: new.sender,
            created_at: Some(created_at),
        };
        inner.messages.push(message);
        inner.broadcast_messages(&new.trip_id);
        Ok(id)
    }

    async fn fetch_messages(&self, trip_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.messages_for(trip_id))
    }

    async fn subscribe_messages(
        &self,
        trip_id: &str,
        capacity: usize,
    ) -> Result<Subscription<ChatMessage>, StoreError> {
        if !self.chat_index {
            return Err(StoreError::MissingIndex {
                description: "tripMessages requires a composite index on (trip_id, created_at)".into(),
            });
        }
        let mut inner = self.inner.write().await;
        let (tx, events) = mpsc::channel(capacity.max(1));
        let initial = inner.messages_for_ordered(trip_id);
        let _ = tx.try_send(SnapshotEvent::Snapshot(initial));
        let id = Uuid::new_v4();
        inner.message_subs.insert(id, MessageSub { trip_id: trip_id.to_owned(), tx });
        Ok(Subscription { id, events })
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        #[cfg(test)]
        if inner.fail_next_upload {
            inner.fail_next_upload = false;
            return Err(StoreError::Unavailable { reason: "injected upload failure".into() });
        }
        inner
            .blobs
            .insert(key.to_owned(), StoredBlob { content_type: content_type.to_owned(), len: bytes.len() });
        Ok(format!("memory://{key}"))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;

    impl MemoryStore {
        /// Insert a notification verbatim (explicit id/timestamp/read flag)
        /// and broadcast, as an external event writer would.
        pub(crate) async fn seed_notification(&self, notification: Notification) {
            let mut inner = self.inner.write().await;
            let email = notification.recipient_email.clone();
            inner.notifications.insert(notification.id.clone(), notification);
            inner.broadcast_notifications(&email);
        }

        /// Insert a message verbatim and broadcast.
        pub(crate) async fn seed_message(&self, message: ChatMessage) {
            let mut inner = self.inner.write().await;
            let trip_id = message.trip_id.clone();
            inner.messages.push(message);
            inner.broadcast_messages(&trip_id);
        }

        /// Push a lost-subscription event to every message subscriber and
        /// drop them, as a backend revoking a live query would.
        pub(crate) async fn emit_message_lost(&self, err: StoreError) {
            let mut inner = self.inner.write().await;
            for sub in inner.message_subs.values() {
                let _ = sub.tx.try_send(SnapshotEvent::Lost(err.clone()));
            }
            inner.message_subs.clear();
        }

        /// Make the next document write fail with `Unavailable`.
        pub(crate) async fn fail_next_write(&self) {
            self.inner.write().await.fail_next_write = true;
        }

        /// Make the next blob upload fail with `Unavailable`.
        pub(crate) async fn fail_next_upload(&self) {
            self.inner.write().await.fail_next_upload = true;
        }

        /// Number of blobs stored, for asserting zero upload attempts.
        pub(crate) async fn blob_count(&self) -> usize {
            self.inner.read().await.blobs.len()
        }

        /// Content type recorded for `key`, if present.
        pub(crate) async fn blob_content_type(&self, key: &str) -> Option<String> {
            self.inner.read().await.blobs.get(key).map(|b| b.content_type.clone())
        }

        /// Stored byte length for `key`, if present.
        pub(crate) async fn blob_len(&self, key: &str) -> Option<usize> {
            self.inner.read().await.blobs.get(key).map(|b| b.len)
        }

        /// Live subscriber counts `(notifications, messages)` after pruning.
        pub(crate) async fn subscriber_counts(&self) -> (usize, usize) {
            let inner = self.inner.read().await;
            (inner.notification_subs.len(), inner.message_subs.len())
        }
    }

    /// A notification with sensible defaults for seeding.
    #[must_use]
    pub(crate) fn notification(id: &str, email: &str, read: bool, created_at: i64) -> Notification {
        Notification {
            id: id.to_owned(),
            recipient_email: email.to_owned(),
            trip_id: "trip-1".into(),
            message: format!("event {id}"),
            kind: "join".into(),
            destination: "/view-trip/trip-1".into(),
            read,
            created_at: Some(created_at),
        }
    }

    /// A chat message with sensible defaults for seeding.
    #[must_use]
    pub(crate) fn chat_message(id: &str, trip_id: &str, created_at: Option<i64>) -> ChatMessage {
        ChatMessage {
            id: id.to_owned(),
            trip_id: trip_id.to_owned(),
            text: format!("msg {id}"),
            image_url: None,
            sender: crate::types::MessageSender {
                id: "u1".into(),
                name: "Ann".into(),
                picture_url: None,
            },
            created_at,
        }
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
