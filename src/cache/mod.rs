//! Watch-driven local mirrors of remote nodes.
//!
//! The three caches share one engine that keeps a `path -> NodeRecord`
//! mirror for a [`Scope`]:
//!
//! | cache | root mirrored | depth below root |
//! |---|---|---|
//! | [`SingleNodeCache`] | yes | 0 |
//! | [`ChildListCache`] | no | 1 |
//! | [`SubtreeCache`] | yes | unbounded, or `max_depth` |
//!
//! Each cache owns a dedicated session and one delivery task. Listeners are
//! invoked sequentially from that task.

mod children_cache;
mod engine;
mod handle;
mod listener;
mod node_cache;
mod tree_cache;
mod watch_ledger;

pub use children_cache::*;
pub use listener::*;
pub use node_cache::*;
pub use tree_cache::*;

#[cfg(test)]
mod children_cache_test;
#[cfg(test)]
mod listener_test;

use crate::coordination::NodeRecord;

/// What a cache tells its listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Added(NodeRecord),
    Updated(NodeRecord),
    Removed(NodeRecord),
    /// The initial snapshot is complete
    Initialized,
    /// The session link dropped; the mirror may be stale
    ConnectionSuspended,
    /// The link is back and the mirror has been resynchronized
    ConnectionReconnected,
    /// The service expired the session; the mirror is kept but stale
    ConnectionLost,
    /// A fired watch could not be re-registered; changes under `path` may be
    /// missed until the next resynchronization
    WatchRegistrationFailed { path: String, reason: String },
}

impl CacheEvent {
    /// Affected node, for node and watch events
    pub fn path(&self) -> Option<&str> {
        match self {
            CacheEvent::Added(r) | CacheEvent::Updated(r) | CacheEvent::Removed(r) => Some(&r.path),
            CacheEvent::WatchRegistrationFailed { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&NodeRecord> {
        match self {
            CacheEvent::Added(r) | CacheEvent::Updated(r) | CacheEvent::Removed(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Added(_) => "added",
            CacheEvent::Updated(_) => "updated",
            CacheEvent::Removed(_) => "removed",
            CacheEvent::Initialized => "initialized",
            CacheEvent::ConnectionSuspended => "suspended",
            CacheEvent::ConnectionReconnected => "reconnected",
            CacheEvent::ConnectionLost => "lost",
            CacheEvent::WatchRegistrationFailed { .. } => "watch_registration_failed",
        }
    }
}

/// How `start` fills the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Return immediately; the mirror fills in the background and every
    /// node found is reported as `Added`
    Normal,
    /// Fill the mirror before `start` returns, without events
    BuildInitialCache,
    /// Fill the mirror before `start` returns, then emit one `Initialized`
    PostInitializedEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLifecycle {
    Latent,
    Started,
    Closed,
}

/// Portion of the tree under the root a cache mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scope {
    include_root: bool,
    max_depth: Option<usize>,
}

impl Scope {
    pub(crate) fn node() -> Self {
        Self {
            include_root: true,
            max_depth: Some(0),
        }
    }

    pub(crate) fn children() -> Self {
        Self {
            include_root: false,
            max_depth: Some(1),
        }
    }

    pub(crate) fn subtree(max_depth: Option<usize>) -> Self {
        Self {
            include_root: true,
            max_depth,
        }
    }

    /// Whether the node `depth` levels below the root is mirrored
    pub(crate) fn tracks_data(
        &self,
        depth: usize,
    ) -> bool {
        if depth == 0 {
            return self.include_root;
        }
        self.max_depth.map_or(true, |max| depth <= max)
    }

    /// Whether children of a node at `depth` are mirrored
    pub(crate) fn tracks_children(
        &self,
        depth: usize,
    ) -> bool {
        self.max_depth.map_or(true, |max| depth < max)
    }
}
