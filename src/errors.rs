//! Error hierarchy for sessions, node operations and watch caches.
//!
//! Node-level outcomes (missing, existing, non-empty) are separate variants so
//! callers can match on them; everything the coordination service rejects is
//! surfaced, never folded into a default value.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::session::SessionLifecycle;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session could not be established within the retry budget
    #[error("Failed to connect to {target} after {attempts} attempts")]
    Connection { target: String, attempts: usize },

    /// A single connection attempt exceeded the connection timeout
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The session lost its link to the ensemble while a request was in flight
    #[error("Connection lost while operating on {0}")]
    ConnectionLoss(String),

    /// The service expired the session; its watches are gone
    #[error("Session expired")]
    SessionExpired,

    #[error("Node does not exist: {0}")]
    NodeMissing(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NodeNotEmpty(String),

    /// Conditional write rejected
    #[error("Version mismatch on {path}: expected {expected}, actual {actual}")]
    BadVersion { path: String, expected: i32, actual: i32 },

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Re-arming a fired watch failed; the mirror can no longer be trusted
    #[error("Failed to re-register watch on {path}: {reason}")]
    WatchRegistration { path: String, reason: String },

    #[error("Session is {actual:?}, operation requires {expected:?}")]
    IllegalSessionState {
        expected: SessionLifecycle,
        actual: SessionLifecycle,
    },

    #[error("Cache has been closed")]
    CacheClosed,

    #[error("Illegal cache state: {0}")]
    IllegalCacheState(&'static str),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Transient failures that a later attempt may get past
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::ConnectTimeout(_) | Error::ConnectionLoss(_)
        )
    }

    /// Errors that mean the session itself is no longer usable
    pub(crate) fn is_session_fault(&self) -> bool {
        matches!(self, Error::ConnectionLoss(_) | Error::SessionExpired)
    }
}
