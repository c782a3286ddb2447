use super::handle::CacheHandle;
use super::CacheLifecycle;
use super::ListenerContainer;
use super::Scope;
use super::StartMode;
use crate::coordination::NodeRecord;
use crate::session::Session;
use crate::CacheConfig;
use crate::Result;

/// Mirrors a single node.
///
/// Reports `Added` when the node appears, `Updated` when its payload or
/// metadata changes and `Removed` when it is deleted. Defaults to
/// [`StartMode::BuildInitialCache`].
pub struct SingleNodeCache {
    handle: CacheHandle,
}

impl SingleNodeCache {
    /// Takes ownership of a session in state `Created`; `start` starts it.
    pub fn new(
        session: Session,
        path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            handle: CacheHandle::new(session, path.into(), Scope::node(), StartMode::BuildInitialCache)?,
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

    /// `None` while the node does not exist
    pub fn current_data(&self) -> Option<NodeRecord> {
        self.handle.shared.mirror.read().get(&self.handle.shared.root).cloned()
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
