use std::collections::BTreeMap;

use super::handle::CacheHandle;
use super::CacheLifecycle;
use super::ListenerContainer;
use super::Scope;
use super::StartMode;
use crate::coordination::join_path;
use crate::coordination::NodeRecord;
use crate::session::Session;
use crate::CacheConfig;
use crate::Result;

/// Mirrors the direct children of a node, not the node itself and not
/// grandchildren. Defaults to [`StartMode::BuildInitialCache`].
pub struct ChildListCache {
    handle: CacheHandle,
}

impl ChildListCache {
    pub fn new(
        session: Session,
        path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            handle: CacheHandle::new(session, path.into(), Scope::children(), StartMode::BuildInitialCache)?,
        })
    }

    pub fn with_start_mode(
        mut self,
        mode: StartMode,
    ) -> Self {
        self.handle.start_mode = mode;
        self
    }

    pub fn with_config(
        mut self,
        config: CacheConfig,
    ) -> Self {
        self.handle.config = config;
        self
    }

    pub async fn start(&self) -> Result<()> {
        self.handle.start().await
    }

    pub async fn close(&self) -> Result<()> {
        self.handle.close().await
    }

    /// Every mirrored child, sorted by path
    pub fn current_data(&self) -> Vec<NodeRecord> {
        self.handle.shared.mirror.read().values().cloned().collect()
    }

    /// Child name to record
    pub fn children(&self) -> BTreeMap<String, NodeRecord> {
        self.handle.shared.child_records(&self.handle.shared.root)
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<NodeRecord> {
        let path = join_path(&self.handle.shared.root, name);
        self.handle.shared.mirror.read().get(&path).cloned()
    }

    /// Empties the mirror without emitting events. Children still present
    /// remotely are reported as `Added` again on the next child list change.
    pub fn clear(&self) {
        self.handle.shared.mirror.write().clear();
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
