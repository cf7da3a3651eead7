//! Per-trip group chat: the sync engine and attachment upload coordination.

pub mod engine;
pub mod upload;

pub use engine::{ChatEngine, ChatError, ChatSnapshot, PanelMode};
pub use upload::{AttachmentFile, SELECT_MAX_BYTES, SEND_MAX_BYTES, UploadError};
