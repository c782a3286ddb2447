//! One-shot node operations.
//!
//! Every call opens its own [`Session`], starts it, runs the operation and
//! releases the session when the call returns. The session's `Drop` closes
//! it, so release also happens when an operation bails out early with `?`.


use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use tracing::warn;

use crate::coordination::ancestors;
use crate::coordination::join_path;
use crate::coordination::Connector;
use crate::coordination::NodeRecord;
use crate::coordination::Op;
use crate::coordination::Stat;
use crate::session::Session;
use crate::session::SessionFactory;
use crate::utils::scoped_timer::ScopedTimer;
use crate::ConnectionTarget;
use crate::Error;
use crate::Result;
use crate::RetryPolicy;
use crate::TreeWatchConfig;

/// How often a batch is rebuilt when a concurrent writer changed the tree
/// between reading it and committing
const MAX_CONFLICT_RETRIES: usize = 5;

/// Stateless facade for node CRUD
#[derive(Clone)]
pub struct NodeStore {
    factory: SessionFactory,
    target: ConnectionTarget,
    retry_policy: RetryPolicy,
    session_timeout: Duration,
    connect_timeout: Duration,
}

impl NodeStore {
    pub fn new(
        factory: SessionFactory,
        target: ConnectionTarget,
        retry_policy: RetryPolicy,
        session_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            target,
            retry_policy,
            session_timeout,
            connect_timeout,
        }
    }

    pub fn from_config(
        connector: Arc<dyn Connector>,
        config: &TreeWatchConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            SessionFactory::new(connector),
            config.session.target()?,
            config.retry,
            config.session.session_timeout(),
            config.session.connection_timeout(),
        ))
    }

    /// `false` for an absent node; absence is never an error.
    pub async fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        let _timer = ScopedTimer::new("exists");
        let session = self.open(path).await?;
        Ok(session.exists(path, false).await?.is_some())
    }

    /// Creates `path` and any missing ancestors in one atomic batch.
    ///
    /// # Errors
    /// [`Error::NodeExists`] when `path` itself is already present.
    pub async fn create(
        &self,
        path: &str,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let _timer = ScopedTimer::new("create");
        let payload = payload.into();
        let session = self.open(path).await?;

        let mut last_err = None;
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let mut ops = Vec::new();
            for ancestor in ancestors(path) {
                if session.exists(ancestor, false).await?.is_none() {
                    ops.push(Op::Create {
                        path: ancestor.to_string(),
                        data: Bytes::new(),
                    });
                }
            }
            ops.push(Op::Create {
                path: path.to_string(),
                data: payload.clone(),
            });

            match session.multi(ops).await {
                Ok(_) => {
                    debug!(path, "node created");
                    return Ok(());
                }
                // An ancestor appeared concurrently; rebuild the batch
                Err(Error::NodeExists(existing)) if existing != path => {
                    debug!(path, %existing, attempt, "ancestor created concurrently");
                    last_err = Some(Error::NodeExists(existing));
                }
                // An ancestor vanished concurrently
                Err(Error::NodeMissing(missing)) => {
                    debug!(path, %missing, attempt, "ancestor removed concurrently");
                    last_err = Some(Error::NodeMissing(missing));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Fatal(format!("create {path} made no attempt"))))
    }

    /// Deletes exactly `path`.
    ///
    /// # Errors
    /// [`Error::NodeNotEmpty`] when it has children, [`Error::NodeMissing`]
    /// when absent.
    pub async fn delete(
        &self,
        path: &str,
    ) -> Result<()> {
        let _timer = ScopedTimer::new("delete");
        let session = self.open(path).await?;
        session.delete(path, None).await
    }

    /// Deletes `path` and every descendant in one atomic batch.
    ///
    /// # Errors
    /// [`Error::NodeMissing`] when `path` itself is absent.
    pub async fn force_delete(
        &self,
        path: &str,
    ) -> Result<()> {
        let _timer = ScopedTimer::new("force_delete");
        let session = self.open(path).await?;

        let mut last_err = None;
        for attempt in 0..MAX_CONFLICT_RETRIES {
            // Preorder; reversed it deletes every child before its parent
            let subtree = collect_subtree(&session, path).await?;
            let ops = subtree
                .into_iter()
                .rev()
                .map(|path| Op::Delete { path, version: None })
                .collect();

            match session.multi(ops).await {
                Ok(results) => {
                    debug!(path, removed = results.len(), "subtree deleted");
                    return Ok(());
                }
                // Tree changed between listing and deleting
                Err(e @ Error::NodeNotEmpty(_)) => {
                    debug!(path, attempt, "subtree grew concurrently: {:?}", e);
                    last_err = Some(e);
                }
                Err(Error::NodeMissing(missing)) if missing != path => {
                    debug!(path, %missing, attempt, "descendant removed concurrently");
                    last_err = Some(Error::NodeMissing(missing));
                }
                Err(e) => return Err(e),
            }
        }
        warn!(path, "force delete kept racing with concurrent writers");
        Err(last_err.unwrap_or_else(|| Error::Fatal(format!("force delete {path} made no attempt"))))
    }

    /// Overwrites the payload without a version check and returns the new
    /// metadata.
    ///
    /// # Errors
    /// [`Error::NodeMissing`] when absent. Failures are never turned into a
    /// default [`Stat`].
    pub async fn update(
        &self,
        path: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Stat> {
        let _timer = ScopedTimer::new("update");
        let session = self.open(path).await?;
        session.set_data(path, payload.into(), None).await
    }

    /// Writes only when the node is still at `version`.
    pub async fn update_versioned(
        &self,
        path: &str,
        payload: impl Into<Bytes>,
        version: i32,
    ) -> Result<Stat> {
        let _timer = ScopedTimer::new("update_versioned");
        let session = self.open(path).await?;
        session.set_data(path, payload.into(), Some(version)).await
    }

    pub async fn get_data(
        &self,
        path: &str,
    ) -> Result<NodeRecord> {
        let _timer = ScopedTimer::new("get_data");
        let session = self.open(path).await?;
        let (data, stat) = session.get_data(path, false).await?;
        Ok(NodeRecord::new(path, data, stat))
    }

    /// Child names, sorted
    pub async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let _timer = ScopedTimer::new("get_children");
        let session = self.open(path).await?;
        let mut children = session.get_children(path, false).await?;
        children.sort();
        Ok(children)
    }

    async fn open(
        &self,
        path: &str,
    ) -> Result<Session> {
        if path.is_empty() {
            return Err(Error::InvalidPath {
                path: String::new(),
                reason: "path must not be empty",
            });
        }
        let mut session = self.factory.create_session(
            self.target.clone(),
            self.retry_policy,
            self.session_timeout,
            self.connect_timeout,
        );
        session.start().await?;
        Ok(session)
    }
}

/// `root` and everything below it, parents before children
async fn collect_subtree(
    session: &Session,
    root: &str,
) -> Result<Vec<String>> {
    let mut ordered = Vec::new();
    let mut stack = vec![root.to_string()];
    while let Some(path) = stack.pop() {
        let children = match session.get_children(&path, false).await {
            Ok(children) => children,
            Err(Error::NodeMissing(_)) if path != root => continue,
            Err(e) => return Err(e),
        };
        for child in children {
            stack.push(join_path(&path, &child));
        }
        ordered.push(path);
    }
    Ok(ordered)
}
