//! Domain model shared across the sync core.
//!
//! DESIGN
//! ======
//! Documents mirror the remote collections one-to-one and stay plain serde
//! structs. Timestamps are milliseconds since the Unix epoch; a missing
//! timestamp (`None`) means the server-assigned value has not been observed
//! yet and sorts last in ascending message order.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTITY
// =============================================================================

/// The authenticated user for this session, loaded once from the persisted
/// session record. Absence means anonymous; all writes are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account identifier. May be empty for legacy records.
    #[serde(default)]
    pub id: String,
    /// Email address; the key every notification query filters on.
    pub email: String,
    /// Display name shown next to sent messages.
    #[serde(default, rename = "name")]
    pub display_name: String,
    /// Avatar URL, if the provider supplied one.
    #[serde(default, rename = "picture")]
    pub picture_url: Option<String>,
}

impl Identity {
    /// Build the sender snapshot embedded in outgoing chat messages.
    ///
    /// Falls back to the email when the account id is empty, so messages
    /// from legacy session records still carry a usable sender key.
    #[must_use]
    pub fn sender_snapshot(&self) -> MessageSender {
        let id = if self.id.is_empty() { self.email.clone() } else { self.id.clone() };
        MessageSender { id, name: self.display_name.clone(), picture_url: self.picture_url.clone() }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// One entry in the `notifications` collection, owned by its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Store-assigned document id, unique within the collection.
    pub id: String,
    /// Recipient email; only this identity may mark the entry read.
    #[serde(rename = "recipientEmail")]
    pub recipient_email: String,
    /// Trip the event refers to.
    #[serde(rename = "tripId")]
    pub trip_id: String,
    /// Human-readable message body.
    pub message: String,
    /// Event kind, e.g. `"join"` or `"invite"`. Free-form.
    #[serde(rename = "type")]
    pub kind: String,
    /// Route the UI should navigate to when the entry is clicked.
    pub destination: String,
    /// Read flag; transitions false -> true exactly once, never back.
    pub read: bool,
    /// Server-assigned creation time (epoch millis).
    #[serde(rename = "timestamp")]
    pub created_at: Option<i64>,
}

/// Payload for creating a notification; the store assigns id, timestamp,
/// and `read = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    #[serde(rename = "recipientEmail")]
    pub recipient_email: String,
    #[serde(rename = "tripId")]
    pub trip_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub destination: String,
}

// =============================================================================
// CHAT MESSAGES
// =============================================================================

/// Sender snapshot denormalized into each message at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "picture")]
    pub picture_url: Option<String>,
}

/// One entry in the `tripMessages` collection. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned document id, unique within the collection.
    pub id: String,
    /// Trip this message belongs to.
    #[serde(rename = "tripId")]
    pub trip_id: String,
    /// Message text; may be empty when an image is attached.
    pub text: String,
    /// Uploaded attachment URL, if any.
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    /// Who sent it, captured at send time.
    pub sender: MessageSender,
    /// Server-assigned creation time (epoch millis). `None` while the
    /// authoritative timestamp is still pending; sorts last ascending.
    #[serde(rename = "timestamp")]
    pub created_at: Option<i64>,
}

/// Payload for writing a message; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(rename = "tripId")]
    pub trip_id: String,
    pub text: String,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    pub sender: MessageSender,
}

// =============================================================================
// TRIP (REFERENCE ONLY)
// =============================================================================

/// Member entry inside a trip's `joined_users` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedUser {
    pub email: String,
    pub name: String,
    #[serde(default, rename = "picture")]
    pub picture_url: Option<String>,
}

/// Trip document as referenced by notifications and chat. This core reads
/// trip ids out of other documents but never mutates trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub location: String,
    #[serde(default, rename = "joinedUsers")]
    pub joined_users: Vec<JoinedUser>,
    #[serde(default, rename = "isPublic")]
    pub is_public: bool,
}

// =============================================================================
// ORDERING
// =============================================================================

/// Sort messages by timestamp ascending, keeping arrival order for equal
/// timestamps and pushing pending (`None`) timestamps last.
pub fn sort_messages_ascending(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| match m.created_at {
        Some(ts) => (false, ts),
        None => (true, 0),
    });
}

/// Sort notifications by timestamp descending, pending timestamps last.
pub fn sort_notifications_descending(notifications: &mut [Notification]) {
    notifications.sort_by_key(|n| match n.created_at {
        Some(ts) => (false, std::cmp::Reverse(ts)),
        None => (true, std::cmp::Reverse(0)),
    });
}

// =============================================================================
// TIME
// =============================================================================

/// Current wall clock in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
