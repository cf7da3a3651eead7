//! Live notification store — the single source of truth for "what are my
//! notifications and how many are unread".
//!
//! DESIGN
//! ======
//! One standing observation per identity delivers full result-set
//! snapshots; every snapshot replaces the list wholesale and recomputes the
//! unread count inside the same critical section, so consumers can never
//! observe a half-applied update or a drifted counter.
//!
//! Read-state writes go through the service and never touch local state
//! pre-emptively: the authoritative `read` flip arrives through the live
//! observation (or a manual refresh), which is the only path that mutates
//! the list.
//!
//! ERROR HANDLING
//! ==============
//! When the observation cannot be established (or dies later), the store
//! logs the condition and serves one-shot refreshed data instead. It does
//! not retry the observation on its own; a later `start` for the same
//! identity is the re-attempt path.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::notifications::service::{self, NotificationError};
use crate::store::{DocumentStore, SnapshotEvent, Subscription, subscription_queue_capacity};
use crate::types::{Identity, Notification};

struct State {
    identity: Option<Identity>,
    notifications: Vec<Notification>,
    unread_count: usize,
    /// True while snapshots are arriving from a live observation.
    live: bool,
    /// Bumped on every teardown; apply paths check it before touching
    /// state so a stale push from a released observation is never applied.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl State {
    fn new() -> Self {
        Self { identity: None, notifications: Vec::new(), unread_count: 0, live: false, epoch: 0, task: None }
    }

    /// Wholesale swap; the unread count is derived here and nowhere else.
    fn apply(&mut self, notifications: Vec<Notification>) {
        self.unread_count = notifications.iter().filter(|n| !n.read).count();
        self.notifications = notifications;
    }

    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.live = false;
    }
}

/// Read-only view handed to UI consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub live: bool,
}

/// Live-updated notification state for the current identity.
pub struct NotificationStore {
    store: Arc<dyn DocumentStore>,
    inner: Arc<RwLock<State>>,
}

impl NotificationStore {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, inner: Arc::new(RwLock::new(State::new())) }
    }

    /// Begin observing notifications for `identity`.
    ///
    /// Idempotent while an observation for the same identity is alive;
    /// a different identity tears the previous observation down first.
    /// An absent identity clears all state and observes nothing. When the
    /// live observation cannot be established, the store logs the
    /// condition and falls back to a single [`Self::refresh`].
    pub async fn start(&self, identity: Option<Identity>) {
        let Some(identity) = identity else {
            let mut state = self.inner.write().await;
            state.teardown();
            state.identity = None;
            state.notifications.clear();
            state.unread_count = 0;
            return;
        };

        let epoch = {
            let mut state = self.inner.write().await;
            let same_identity = state.identity.as_ref().is_some_and(|cur| cur.email == identity.email);
            if same_identity && state.task.as_ref().is_some_and(|t| !t.is_finished()) {
                return;
            }
            state.teardown();
            state.identity = Some(identity.clone());
            state.epoch
        };

        match self.store.subscribe_notifications(&identity.email, subscription_queue_capacity()).await {
            Ok(subscription) => {
                let mut state = self.inner.write().await;
                if state.epoch != epoch {
                    // Superseded by a newer start/stop while subscribing.
                    return;
                }
                info!(subscription = %subscription.id, email = %identity.email, "notification observation established");
                state.task = Some(tokio::spawn(apply_loop(
                    Arc::clone(&self.store),
                    Arc::clone(&self.inner),
                    identity.email.clone(),
                    epoch,
                    subscription,
                )));
            }
            Err(e) => {
                warn!(error = %e, email = %identity.email, "notification observation failed; falling back to one-shot refresh");
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "fallback notification refresh failed");
                }
            }
        }
    }

    /// Release the observation. Safe to call when not started.
    pub async fn stop(&self) {
        self.inner.write().await.teardown();
    }

    /// One-shot re-fetch (list-all + list-unread), applied atomically.
    ///
    /// The unread count comes from the dedicated unread query so it stays
    /// correct even when unread entries fall outside the capped page.
    ///
    /// # Errors
    ///
    /// Returns a store error if either query fails; local state is left
    /// untouched in that case.
    pub async fn refresh(&self) -> Result<(), NotificationError> {
        let (email, epoch) = {
            let state = self.inner.read().await;
            let Some(identity) = &state.identity else {
                return Ok(());
            };
            (identity.email.clone(), state.epoch)
        };
        refresh_into(self.store.as_ref(), &self.inner, &email, epoch).await
    }

    /// Ask the service to mark one notification read. Local state is not
    /// touched; the authoritative update arrives via the observation.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub async fn mark_one_read(&self, id: &str) -> Result<(), NotificationError> {
        service::mark_one_read(self.store.as_ref(), id).await
    }

    /// Ask the service to mark everything read for the current identity.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::NotSignedIn`] when anonymous, or the
    /// batch failure from the service.
    pub async fn mark_all_read(&self) -> Result<(), NotificationError> {
        let email = {
            let state = self.inner.read().await;
            let Some(identity) = &state.identity else {
                return Err(NotificationError::NotSignedIn);
            };
            identity.email.clone()
        };
        service::mark_all_read(self.store.as_ref(), &email).await
    }

    /// Read-only snapshot for UI consumers.
    pub async fn snapshot(&self) -> NotificationSnapshot {
        let state = self.inner.read().await;
        NotificationSnapshot {
            notifications: state.notifications.clone(),
            unread_count: state.unread_count,
            live: state.live,
        }
    }
}

async fn apply_loop(
    store: Arc<dyn DocumentStore>,
    inner: Arc<RwLock<State>>,
    email: String,
    epoch: u64,
    mut subscription: Subscription<Notification>,
) {
    while let Some(event) = subscription.events.recv().await {
        match event {
            SnapshotEvent::Snapshot(list) => {
                let mut state = inner.write().await;
                if state.epoch != epoch {
                    return;
                }
                state.apply(list);
                state.live = true;
            }
            SnapshotEvent::Lost(err) => {
                warn!(error = %err, %email, "notification observation lost; refreshing once");
                if let Err(e) = refresh_into(store.as_ref(), &inner, &email, epoch).await {
                    warn!(error = %e, %email, "refresh after lost observation failed");
                }
                let mut state = inner.write().await;
                if state.epoch == epoch {
                    state.live = false;
                }
                return;
            }
        }
    }
}

async fn refresh_into(
    store: &dyn DocumentStore,
    inner: &RwLock<State>,
    email: &str,
    epoch: u64,
) -> Result<(), NotificationError> {
    let unread = service::list_unread(store, email).await?;
    let all = service::list_all(store, email).await?;

    let mut state = inner.write().await;
    if state.epoch != epoch {
        return Ok(());
    }
    state.notifications = all;
    state.unread_count = unread.len();
    Ok(())
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
