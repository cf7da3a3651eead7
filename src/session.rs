//! Session accessor — the persisted identity record.
//!
//! SYSTEM CONTEXT
//! ==============
//! Login happens outside this core; whatever flow authenticated the user
//! leaves a single JSON record on disk. Every subscriber reads that record
//! once at startup and treats the identity as immutable for the session.
//! No record means anonymous, under which all write operations are
//! rejected downstream.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::Identity;

/// Default location of the persisted session record.
pub const DEFAULT_SESSION_FILE: &str = ".tripsync/session.json";

/// Environment variable overriding the session record path.
pub const SESSION_FILE_ENV: &str = "TRIPSYNC_SESSION_FILE";

/// Failure modes when reading the session record.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The record exists but could not be read.
    #[error("failed to read session record {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The record exists but is not a valid identity document.
    #[error("malformed session record {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only holder of the current authenticated identity.
#[derive(Debug, Clone)]
pub struct SessionStore {
    identity: Option<Identity>,
}

impl SessionStore {
    /// Load from the default path, honoring [`SESSION_FILE_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a record exists but cannot be read or
    /// parsed. A missing record is not an error — it means anonymous.
    pub fn load_default() -> Result<Self, SessionError> {
        let path = std::env::var(SESSION_FILE_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_SESSION_FILE), PathBuf::from);
        Self::load_from(&path)
    }

    /// Load from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a record exists but cannot be read or
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self, SessionError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no session record; running anonymous");
                return Ok(Self { identity: None });
            }
            Err(source) => return Err(SessionError::Io { path: path.display().to_string(), source }),
        };

        let identity: Identity = serde_json::from_str(&raw)
            .map_err(|source| SessionError::Malformed { path: path.display().to_string(), source })?;
        debug!(email = %identity.email, "session record loaded");
        Ok(Self { identity: Some(identity) })
    }

    /// An accessor seeded directly with an identity (or anonymous), for
    /// hosts that manage the record themselves.
    #[must_use]
    pub fn with_identity(identity: Option<Identity>) -> Self {
        Self { identity }
    }

    /// The current identity, cloned. `None` means anonymous.
    #[must_use]
    pub fn current_user(&self) -> Option<Identity> {
        self.identity.clone()
    }

    /// Whether a user is signed in.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
