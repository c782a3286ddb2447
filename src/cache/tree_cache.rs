use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::handle::CacheHandle;
use super::CacheLifecycle;
use super::ListenerContainer;
use super::Scope;
use super::StartMode;
use crate::coordination::NodeRecord;
use crate::session::Session;
use crate::CacheConfig;
use crate::Result;

/// Mirrors the root and every descendant, keyed by full path.
///
/// Watches are kept on every mirrored node and re-registered after each
/// fire; nodes created later are picked up through their parent's child
/// watch. Defaults to [`StartMode::PostInitializedEvent`].
pub struct SubtreeCache {
    handle: CacheHandle,
}

impl SubtreeCache {
    pub fn new(
        session: Session,
        path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            handle: CacheHandle::new(session, path.into(), Scope::subtree(None), StartMode::PostInitializedEvent)?,
        })
    }

    pub fn with_start_mode(
        mut self,
        mode: StartMode,
    ) -> Self {
        self.handle.start_mode = mode;
        self
    }

    /// Applies `config`, including its `max_tree_depth`.
    ///
    /// The depth only takes effect before [`start`](Self::start); on a
    /// started cache it is ignored with a warning.
    pub fn with_config(
        mut self,
        config: CacheConfig,
    ) -> Self {
        self.set_depth(config.max_tree_depth);
        self.handle.config = config;
        self
    }

    /// Mirrors nodes at most `depth` levels below the root. Ignored with a
    /// warning once the cache has been started.
    pub fn with_max_depth(
        mut self,
        depth: usize,
    ) -> Self {
        self.set_depth(Some(depth));
        self
    }

    fn set_depth(
        &mut self,
        depth: Option<usize>,
    ) {
        match Arc::get_mut(&mut self.handle.shared) {
            Some(shared) => shared.scope = Scope::subtree(depth),
            None => warn!(root = %self.handle.shared.root, ?depth, "depth limit ignored, cache already started"),
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.handle.start().await
    }

    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<NodeRecord> {
        self.handle.shared.mirror.read().get(path).cloned()
    }

    /// Child name to record; `None` when `path` is not mirrored
    pub fn children_of(
        &self,
        path: &str,
    ) -> Option<BTreeMap<String, NodeRecord>> {
        if !self.handle.shared.mirror.read().contains_key(path) {
            return None;
        }
        Some(self.handle.shared.child_records(path))
    }

    /// Copy of the whole mirror
    pub fn snapshot(&self) -> BTreeMap<String, NodeRecord> {
        self.handle.shared.mirror.read().clone()
    }

    /// Watches currently registered by this cache
    pub fn armed_watches(&self) -> usize {
        self.handle.shared.ledger.armed_count()
    }

    pub fn path(&self) -> &str {
        &self.handle.shared.root
    }

    pub fn listenable(&self) -> &ListenerContainer {
        &self.handle.shared.listeners
    }

    pub fn is_synchronized(&self) -> bool {
        self.handle.shared.is_synchronized()
    }

    pub fn state(&self) -> CacheLifecycle {
        self.handle.state()
    }
}
