//! Real-time synchronization core for the tripsync trip planner.
//!
//! ARCHITECTURE
//! ============
//! Two independent consumers sit on top of one document-store contract:
//! the [`notifications::NotificationStore`] (per-user notification list and
//! derived unread count) and the [`chat::ChatEngine`] (per-trip message
//! stream). Both observe the store through live subscriptions delivering
//! full result-set snapshots, and both degrade deterministically to
//! one-shot fetches when the backend cannot serve the preferred query —
//! without losing messages or double-counting unread items.
//!
//! UI layers read cloned snapshots and invoke store operations; they never
//! touch the document store directly. The [`session::SessionStore`] feeds
//! the authenticated identity into both consumers at startup.

pub mod chat;
pub mod notifications;
pub mod session;
pub mod store;
pub mod types;

pub use chat::{ChatEngine, ChatError, PanelMode};
pub use notifications::{NotificationError, NotificationStore};
pub use session::{SessionError, SessionStore};
pub use store::{BlobStore, DocumentStore, SnapshotEvent, StoreError, Subscription};
pub use types::{ChatMessage, Identity, MessageSender, Notification};
