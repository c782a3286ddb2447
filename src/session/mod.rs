//! Session construction and lifetime.
//!
//! [`SessionFactory::create_session`] performs no I/O. [`Session::start`]
//! connects, retrying with the session's [`RetryPolicy`]. A started session
//! is closed exactly once: explicitly through [`Session::close`] or, on every
//! other exit path, when the value is dropped.


use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::coordination::Connector;
use crate::coordination::CoordinationClient;
use crate::coordination::NotificationSink;
use crate::coordination::NotificationStream;
use crate::coordination::Op;
use crate::coordination::OpResult;
use crate::coordination::Stat;
use crate::metrics::SESSION_CONNECT_ATTEMPTS;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::utils::async_task::BackoffExhausted;
use crate::ConnectionTarget;
use crate::Error;
use crate::Result;
use crate::RetryPolicy;
use crate::SessionConfig;

/// Lifecycle of a [`Session`] handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Created,
    Started,
    Closed,
}

/// Builds sessions. Holds only the connector; every call is independent.
#[derive(Clone)]
pub struct SessionFactory {
    connector: Arc<dyn Connector>,
}

impl SessionFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Returns a session in state `Created`. No network I/O happens here.
    pub fn create_session(
        &self,
        target: ConnectionTarget,
        retry_policy: RetryPolicy,
        session_timeout: Duration,
        connect_timeout: Duration,
    ) -> Session {
        let (sink, notifications) = mpsc::unbounded_channel();
        Session {
            id: nanoid::nanoid!(10),
            target,
            retry_policy,
            session_timeout,
            connect_timeout,
            connector: self.connector.clone(),
            lifecycle: SessionLifecycle::Created,
            client: None,
            sink,
            notifications: Some(notifications),
        }
    }

    pub fn create_from_config(
        &self,
        config: &SessionConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Session> {
        Ok(self.create_session(
            config.target()?,
            retry_policy,
            config.session_timeout(),
            config.connection_timeout(),
        ))
    }
}

/// Exclusively owned handle to one coordination session
pub struct Session {
    id: String,
    target: ConnectionTarget,
    retry_policy: RetryPolicy,
    session_timeout: Duration,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    lifecycle: SessionLifecycle,
    client: Option<Arc<dyn CoordinationClient>>,
    sink: NotificationSink,
    notifications: Option<NotificationStream>,
}

impl std::fmt::Debug for Session {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Local handle id used in logs
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionLifecycle {
        self.lifecycle
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Connects, retrying per the retry policy.
    ///
    /// # Errors
    /// - [`Error::Connection`] once every attempt failed
    /// - [`Error::IllegalSessionState`] unless the session is `Created`
    pub async fn start(&mut self) -> Result<()> {
        self.expect_state(SessionLifecycle::Created)?;
        let client = self.establish().await?;
        info!(session = %self.id, remote_id = client.session_id(), target = %self.target, "session started");
        self.client = Some(client);
        self.lifecycle = SessionLifecycle::Started;
        Ok(())
    }

    /// Replaces the underlying connection after the service expired it.
    /// The notification stream is kept, so consumers see one ordered feed
    /// across connections.
    pub async fn restart(&mut self) -> Result<()> {
        self.expect_state(SessionLifecycle::Started)?;
        if let Some(old) = self.client.take() {
            old.close();
        }
        let client = self.establish().await?;
        info!(session = %self.id, remote_id = client.session_id(), "session re-established");
        self.client = Some(client);
        Ok(())
    }

    /// Releases the connection. Safe to call more than once; the underlying
    /// client is closed exactly once.
    pub fn close(&mut self) {
        if self.lifecycle == SessionLifecycle::Closed {
            return;
        }
        if let Some(client) = self.client.take() {
            debug!(session = %self.id, remote_id = client.session_id(), "closing session");
            client.close();
        }
        self.lifecycle = SessionLifecycle::Closed;
    }

    /// The ordered stream of state changes and watch fires. Can be taken once.
    pub fn take_notifications(&mut self) -> Option<NotificationStream> {
        self.notifications.take()
    }

    pub fn client(&self) -> Result<&Arc<dyn CoordinationClient>> {
        match (&self.client, self.lifecycle) {
            (Some(client), SessionLifecycle::Started) => Ok(client),
            (_, actual) => Err(Error::IllegalSessionState {
                expected: SessionLifecycle::Started,
                actual,
            }),
        }
    }

    pub async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>> {
        self.client()?.exists(path, watch).await
    }

    pub async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Bytes, Stat)> {
        self.client()?.get_data(path, watch).await
    }

    pub async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>> {
        self.client()?.get_children(path, watch).await
    }

    pub async fn create(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<Stat> {
        self.client()?.create(path, data).await
    }

    pub async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.client()?.delete(path, version).await
    }

    pub async fn set_data(
        &self,
        path: &str,
        data: Bytes,
        version: Option<i32>,
    ) -> Result<Stat> {
        self.client()?.set_data(path, data, version).await
    }

    pub async fn multi(
        &self,
        ops: Vec<Op>,
    ) -> Result<Vec<OpResult>> {
        self.client()?.multi(ops).await
    }

    fn expect_state(
        &self,
        expected: SessionLifecycle,
    ) -> Result<()> {
        if self.lifecycle != expected {
            return Err(Error::IllegalSessionState {
                expected,
                actual: self.lifecycle,
            });
        }
        Ok(())
    }

    async fn establish(&self) -> Result<Arc<dyn CoordinationClient>> {
        let connector = &self.connector;
        let target = &self.target;
        let session_timeout = self.session_timeout;
        let sink = &self.sink;

        let attempt = || async move {
            let result = connector.connect(target, session_timeout, sink.clone()).await;
            let outcome = if result.is_ok() { "success" } else { "failure" };
            SESSION_CONNECT_ATTEMPTS.with_label_values(&[outcome]).inc();
            result
        };

        task_with_timeout_and_exponential_backoff(attempt, self.retry_policy, self.connect_timeout)
            .await
            .map_err(|BackoffExhausted { attempts, last_error }| {
                warn!(session = %self.id, target = %self.target, attempts, "giving up connecting: {:?}", last_error);
                Error::Connection {
                    target: self.target.to_string(),
                    attempts,
                }
            })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
