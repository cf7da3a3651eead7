//! Notification service — stateless request/response operations.
//!
//! DESIGN
//! ======
//! Thin async functions over the injected document store, one per remote
//! operation. Nothing here holds state; the live store in
//! [`crate::notifications::store`] layers subscriptions and caching on top.
//!
//! ERROR HANDLING
//! ==============
//! Every operation returns a `Result` and never panics past this boundary.
//! `mark_all_read` issues one write per unread document concurrently; a
//! single failed write reports the whole batch as failed even though other
//! writes may have applied — the store's next refresh reconciles true
//! state.

use futures::future::join_all;
use tracing::{info, warn};

use crate::store::{DocumentStore, StoreError};
use crate::types::{NewNotification, Notification};

/// Most recent notifications returned by [`list_all`].
pub const LIST_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A write was attempted without an authenticated identity.
    #[error("not signed in")]
    NotSignedIn,
    /// One or more writes in a mark-all-read batch failed. Some documents
    /// may still have been updated.
    #[error("{failed} of {total} read-state writes failed")]
    PartialBatch { failed: usize, total: usize },
}

/// Create a notification for `recipient_email`, returning the new id.
///
/// # Errors
///
/// Returns a store error if the write fails.
pub async fn create(
    store: &dyn DocumentStore,
    recipient_email: &str,
    trip_id: &str,
    message: &str,
    kind: &str,
    destination: &str,
) -> Result<String, NotificationError> {
    let id = store
        .create_notification(NewNotification {
            recipient_email: recipient_email.to_owned(),
            trip_id: trip_id.to_owned(),
            message: message.to_owned(),
            kind: kind.to_owned(),
            destination: destination.to_owned(),
        })
        .await?;
    info!(%id, recipient = %recipient_email, kind, "notification created");
    Ok(id)
}

/// Up to [`LIST_LIMIT`] most recent notifications for `email`, newest first.
///
/// # Errors
///
/// Returns a store error if the query fails.
pub async fn list_all(store: &dyn DocumentStore, email: &str) -> Result<Vec<Notification>, NotificationError> {
    Ok(store.list_notifications(email, LIST_LIMIT).await?)
}

/// All unread notifications for `email`, newest first.
///
/// # Errors
///
/// Returns a store error if the query fails.
pub async fn list_unread(store: &dyn DocumentStore, email: &str) -> Result<Vec<Notification>, NotificationError> {
    Ok(store.list_unread_notifications(email).await?)
}

/// Mark exactly one notification read. Already-read ids are a no-op.
///
/// # Errors
///
/// Returns a store error if the write fails or the id is unknown.
pub async fn mark_one_read(store: &dyn DocumentStore, id: &str) -> Result<(), NotificationError> {
    Ok(store.mark_notification_read(id).await?)
}

/// Mark every unread notification for `email` read, one concurrent write
/// per document.
///
/// # Errors
///
/// Returns [`NotificationError::PartialBatch`] when any individual write
/// fails; writes that already applied are not rolled back.
pub async fn mark_all_read(store: &dyn DocumentStore, email: &str) -> Result<(), NotificationError> {
    let unread = store.list_unread_notifications(email).await?;
    if unread.is_empty() {
        return Ok(());
    }

    let total = unread.len();
    let writes = unread.iter().map(|n| store.mark_notification_read(&n.id));
    let failed = join_all(writes).await.into_iter().filter(Result::is_err).count();

    if failed > 0 {
        warn!(failed, total, email, "mark-all-read batch partially failed");
        return Err(NotificationError::PartialBatch { failed, total });
    }
    Ok(())
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
