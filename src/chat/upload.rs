//! Attachment upload coordination for chat sends.
//!
//! Keys are deterministic: `chat-images/{trip_id}/{timestamp}-{name}` with
//! the file name sanitized to `[A-Za-z0-9.]`. The timestamp component keeps
//! keys collision-free without coordinating with the blob store.

use tracing::{info, warn};

use crate::store::BlobStore;
use crate::types::now_ms;

/// Hard cap enforced at send time.
pub const SEND_MAX_BYTES: usize = 2 * 1024 * 1024;

/// Softer cap enforced when the user picks a file.
pub const SELECT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// A file the user picked for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Upload failure; the enclosing send always aborts on this.
#[derive(Debug, thiserror::Error)]
#[error("attachment upload failed: {message}")]
pub struct UploadError {
    pub message: String,
}

/// Replace every character outside `[A-Za-z0-9.]` with `_`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}

/// Blob key for an attachment: `chat-images/{trip_id}/{ts}-{name}`.
#[must_use]
pub fn attachment_key(trip_id: &str, file_name: &str, ts: i64) -> String {
    format!("chat-images/{trip_id}/{ts}-{}", sanitize_file_name(file_name))
}

/// Store the attachment and return its retrievable URL.
///
/// # Errors
///
/// Returns [`UploadError`] carrying the backend's message when the write
/// fails; nothing is retried.
pub async fn upload_attachment(
    blobs: &dyn BlobStore,
    trip_id: &str,
    file: &AttachmentFile,
) -> Result<String, UploadError> {
    let key = attachment_key(trip_id, &file.name, now_ms());
    info!(%key, size = file.size(), content_type = %file.content_type, "uploading attachment");

    match blobs.put(&key, &file.bytes, &file.content_type).await {
        Ok(url) => Ok(url),
        Err(e) => {
            warn!(error = %e, %key, "attachment upload failed");
            Err(UploadError { message: e.to_string() })
        }
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
