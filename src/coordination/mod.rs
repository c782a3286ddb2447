//! Capability interface of the coordination service.
//!
//! The wire protocol and handshake belong to whichever client library backs
//! these traits. The rest of the crate only relies on the contract below:
//!
//! - reads with `watch = true` register a one-shot watch; the next matching
//!   change produces exactly one [`WatchedEvent`] on the session's
//!   [`NotificationSink`], after which the registration is consumed
//! - `exists` on a missing node registers a creation watch
//! - session state transitions and watch fires share one ordered stream
//!
//! [`InMemoryEnsemble`](crate::ensemble::InMemoryEnsemble) is the in-process
//! implementation.

mod path;
mod types;

pub use path::*;
pub use types::*;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::ConnectionTarget;
use crate::Result;

/// Ordered stream of everything a session observes
pub type NotificationSink = mpsc::UnboundedSender<Notification>;
pub type NotificationStream = mpsc::UnboundedReceiver<Notification>;

/// Opens connections to an ensemble
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Performs one connection attempt. Retrying is the caller's job.
    async fn connect(
        &self,
        target: &ConnectionTarget,
        session_timeout: Duration,
        sink: NotificationSink,
    ) -> Result<Arc<dyn CoordinationClient>>;
}

/// Primitive node operations over one live connection
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    fn session_id(&self) -> u64;

    /// `Ok(None)` when absent. With `watch`, arms a data watch on an
    /// existing node or a creation watch on a missing one.
    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>>;

    /// Fails with `NodeMissing` when absent; no watch is left in that case.
    async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(bytes::Bytes, Stat)>;

    /// Child names (not full paths), unordered.
    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>>;

    /// Creates a persistent node. The parent must exist.
    async fn create(
        &self,
        path: &str,
        data: bytes::Bytes,
    ) -> Result<Stat>;

    /// `version = None` skips the version check.
    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()>;

    async fn set_data(
        &self,
        path: &str,
        data: bytes::Bytes,
        version: Option<i32>,
    ) -> Result<Stat>;

    /// Applies every op or none of them.
    async fn multi(
        &self,
        ops: Vec<Op>,
    ) -> Result<Vec<OpResult>>;

    /// Releases the connection. Idempotent.
    fn close(&self);
}
