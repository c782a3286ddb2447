use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::engine::CacheShared;
use super::engine::Engine;
use super::engine::Initial;
use super::CacheLifecycle;
use super::Scope;
use super::StartMode;
use crate::coordination::validate_path;
use crate::session::Session;
use crate::utils::async_task::spawn_task;
use crate::CacheConfig;
use crate::Error;
use crate::Result;

enum Phase {
    Latent(Session),
    Started {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Closed,
}

/// Lifecycle plumbing common to every cache variant
pub(crate) struct CacheHandle {
    pub(crate) shared: Arc<CacheShared>,
    pub(crate) start_mode: StartMode,
    pub(crate) config: CacheConfig,
    phase: Mutex<Phase>,
}

impl CacheHandle {
    pub(crate) fn new(
        session: Session,
        root: String,
        scope: Scope,
        start_mode: StartMode,
    ) -> Result<Self> {
        validate_path(&root)?;
        Ok(Self {
            shared: Arc::new(CacheShared::new(root, scope)),
            start_mode,
            config: CacheConfig::default(),
            phase: Mutex::new(Phase::Latent(session)),
        })
    }

    /// `Closed` also once the delivery task gave up on an expired session
    pub(crate) fn state(&self) -> CacheLifecycle {
        self.shared.lifecycle()
    }

    /// Starts the session, fills the mirror per the start mode and launches
    /// the delivery task. A failed session start leaves the cache latent; a
    /// failed initial build closes it.
    pub(crate) async fn start(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        let mut session = match std::mem::replace(&mut *phase, Phase::Closed) {
            Phase::Latent(session) => session,
            Phase::Started { cancel, task } => {
                *phase = Phase::Started { cancel, task };
                if self.shared.is_closed() {
                    return Err(Error::CacheClosed);
                }
                return Err(Error::IllegalCacheState("cache already started"));
            }
            Phase::Closed => return Err(Error::CacheClosed),
        };
        if self.shared.is_closed() {
            return Err(Error::CacheClosed);
        }

        if let Err(e) = session.start().await {
            *phase = Phase::Latent(session);
            return Err(e);
        }

        match self.launch(session).await {
            Ok((cancel, task)) => {
                *phase = Phase::Started { cancel, task };
                info!(cache = %self.shared.id, root = %self.shared.root, mode = ?self.start_mode, "cache started");
                Ok(())
            }
            Err(e) => {
                self.shared.mark_closed();
                self.shared.set_lifecycle(CacheLifecycle::Closed);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        mut session: Session,
    ) -> Result<(CancellationToken, JoinHandle<()>)> {
        let notifications = session
            .take_notifications()
            .ok_or(Error::IllegalCacheState("notification stream already taken"))?;
        let mut engine = Engine::new(self.shared.clone(), session, self.config.clone());

        let initial = match self.start_mode {
            StartMode::Normal => Initial::Populate,
            StartMode::BuildInitialCache => {
                engine.populate_silently().await?;
                Initial::Nothing
            }
            StartMode::PostInitializedEvent => {
                engine.populate_silently().await?;
                Initial::AnnounceInitialized
            }
        };

        // before spawning: the task may end the cache on its own
        self.shared.set_lifecycle(CacheLifecycle::Started);
        let cancel = CancellationToken::new();
        let task = spawn_task(
            &format!("cache-{}", self.shared.id),
            engine.run(notifications, cancel.clone(), initial),
        );
        Ok((cancel, task))
    }

    /// Stops delivery, drops every listener and releases the session.
    /// Returns once the delivery task has exited. Idempotent.
    pub(crate) async fn close(&self) -> Result<()> {
        self.shared.mark_closed();
        self.shared.listeners.clear();

        let mut phase = self.phase.lock().await;
        let previous = std::mem::replace(&mut *phase, Phase::Closed);
        self.shared.set_lifecycle(CacheLifecycle::Closed);
        match previous {
            Phase::Started { cancel, task } => {
                cancel.cancel();
                task.await?;
                debug!(cache = %self.shared.id, "cache closed");
            }
            Phase::Latent(session) => drop(session),
            Phase::Closed => {}
        }
        Ok(())
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.shared.mark_closed();
        if let Phase::Started { cancel, .. } = self.phase.get_mut() {
            cancel.cancel();
        }
    }
}
