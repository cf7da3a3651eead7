//! Document-store and blob-store contracts the sync core depends on.
//!
//! ARCHITECTURE
//! ============
//! The managed backends are out of scope; this module pins down exactly the
//! query and write shapes the core consumes, as async traits injected via
//! `Arc<dyn DocumentStore>` / `Arc<dyn BlobStore>`. Live subscriptions are
//! explicit objects carrying a channel of full result-set snapshots, so the
//! consuming stores can keep their atomic-swap contract regardless of how a
//! concrete backend delivers changes.
//!
//! ERROR HANDLING
//! ==============
//! Capability gaps (a query shape the backend cannot serve, e.g. a missing
//! composite index) are a distinct error from transport failure: the former
//! is recovered locally by degrading to one-shot fetches, the latter is
//! surfaced to callers and never retried automatically.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{ChatMessage, NewMessage, NewNotification, Notification};

/// Default per-subscriber snapshot queue depth.
pub const DEFAULT_SUBSCRIPTION_QUEUE_CAPACITY: usize = 32;

/// Resolve the subscription queue capacity, overridable via
/// `TRIPSYNC_SUBSCRIPTION_QUEUE_CAPACITY`.
#[must_use]
pub fn subscription_queue_capacity() -> usize {
    env_parse("TRIPSYNC_SUBSCRIPTION_QUEUE_CAPACITY", DEFAULT_SUBSCRIPTION_QUEUE_CAPACITY)
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure modes of the store contracts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The requested query shape cannot be served (capability gap).
    #[error("query requires an index the backend does not have: {description}")]
    MissingIndex { description: String },
    /// Network or backend failure on a read or write.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    /// The referenced document does not exist.
    #[error("document not found: {id}")]
    NotFound { id: String },
}

impl StoreError {
    /// Whether this error marks a capability gap rather than a fault.
    #[must_use]
    pub fn is_capability(&self) -> bool {
        matches!(self, Self::MissingIndex { .. })
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// One delivery on a live subscription channel.
#[derive(Debug, Clone)]
pub enum SnapshotEvent<T> {
    /// A full replacement snapshot of the query's current result set.
    Snapshot(Vec<T>),
    /// The subscription died; no further snapshots will arrive.
    Lost(StoreError),
}

/// A standing query registration. The initial result set arrives as the
/// first snapshot; dropping the receiver releases the registration on the
/// backend's next broadcast.
#[derive(Debug)]
pub struct Subscription<T> {
    /// Backend-assigned registration id, used in log correlation.
    pub id: Uuid,
    /// Snapshot delivery channel.
    pub events: mpsc::Receiver<SnapshotEvent<T>>,
}

// =============================================================================
// CONTRACTS
// =============================================================================

/// Query/write contract against the document store.
///
/// Writes return the store-assigned document id; the server timestamp is
/// not known at write-ack time and is only observed through a later
/// snapshot or fetch.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a notification with `read = false` and a server timestamp.
    async fn create_notification(&self, new: NewNotification) -> Result<String, StoreError>;

    /// Notifications for `email`, newest first, capped at `limit`.
    async fn list_notifications(&self, email: &str, limit: usize) -> Result<Vec<Notification>, StoreError>;

    /// All unread notifications for `email`, newest first.
    async fn list_unread_notifications(&self, email: &str) -> Result<Vec<Notification>, StoreError>;

    /// Set `read = true` on exactly one document. No-op when already read.
    async fn mark_notification_read(&self, id: &str) -> Result<(), StoreError>;

    /// Live snapshots of `email`'s notifications, newest first.
    async fn subscribe_notifications(
        &self,
        email: &str,
        capacity: usize,
    ) -> Result<Subscription<Notification>, StoreError>;

    /// Create a chat message with a server timestamp.
    async fn create_message(&self, new: NewMessage) -> Result<String, StoreError>;

    /// Messages for `trip_id` with NO ordering applied — the degraded-mode
    /// query; callers sort client-side.
    async fn fetch_messages(&self, trip_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// Live snapshots of `trip_id`'s messages ordered by timestamp
    /// ascending. Backends without the `(trip_id, created_at)` composite
    /// index refuse with [`StoreError::MissingIndex`], either here or as a
    /// [`SnapshotEvent::Lost`] on the channel.
    async fn subscribe_messages(
        &self,
        trip_id: &str,
        capacity: usize,
    ) -> Result<Subscription<ChatMessage>, StoreError>;
}

/// Write contract against the blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return a retrievable URL. Keys carry a
    /// timestamp component, so overwrites are not expected.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
