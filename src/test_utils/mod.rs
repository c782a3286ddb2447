//! Helpers shared by the unit tests of the session, store and cache modules

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::cache::CacheEvent;
use crate::cache::CacheListener;
use crate::coordination::Connector;
use crate::coordination::CoordinationClient;
use crate::coordination::NotificationSink;
use crate::coordination::Op;
use crate::coordination::OpResult;
use crate::coordination::Stat;
use crate::ensemble::InMemoryEnsemble;
use crate::session::Session;
use crate::session::SessionFactory;
use crate::ConnectionTarget;
use crate::Error;
use crate::Result;
use crate::RetryPolicy;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 10,
        max_retries: 3,
        backoff_multiplier: 2.0,
        max_delay_ms: 100,
    }
}

/// A session in state `Created` against `connector`
pub(crate) fn new_session(connector: Arc<dyn Connector>) -> Session {
    SessionFactory::new(connector).create_session(
        ConnectionTarget::parse("127.0.0.1:2181").unwrap(),
        fast_retry(),
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
}

/// Writes straight to the ensemble through a throwaway connection
pub(crate) struct Writer {
    client: Arc<dyn CoordinationClient>,
}

impl Writer {
    pub(crate) async fn connect(ensemble: &InMemoryEnsemble) -> Self {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let target = ConnectionTarget::parse("127.0.0.1:2181").unwrap();
        let client = ensemble.connect(&target, Duration::from_secs(60), tx).await.unwrap();
        Self { client }
    }

    pub(crate) async fn create(
        &self,
        path: &str,
        data: &'static str,
    ) {
        self.client.create(path, Bytes::from_static(data.as_bytes())).await.unwrap();
    }

    pub(crate) async fn set(
        &self,
        path: &str,
        data: &'static str,
    ) {
        self.client
            .set_data(path, Bytes::from_static(data.as_bytes()), None)
            .await
            .unwrap();
    }

    pub(crate) async fn delete(
        &self,
        path: &str,
    ) {
        self.client.delete(path, None).await.unwrap();
    }
}

/// Polls `condition` until it holds, panicking after five seconds
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached in time");
}

/// Records every event a cache delivers
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl EventLog {
    pub(crate) fn listener(&self) -> impl CacheListener {
        let events = self.events.clone();
        move |event: &CacheEvent| events.lock().push(event.clone())
    }

    pub(crate) fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Waits until at least `count` events arrived and returns all of them
    pub(crate) async fn wait_for(
        &self,
        count: usize,
    ) -> Vec<CacheEvent> {
        self.wait_until(|events| events.len() >= count).await
    }

    pub(crate) async fn wait_until(
        &self,
        done: impl Fn(&[CacheEvent]) -> bool,
    ) -> Vec<CacheEvent> {
        let polled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let events = self.events.lock();
                    if done(&events) {
                        return events.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match polled {
            Ok(events) => events,
            Err(_) => panic!("timed out waiting for cache events, got {:?}", self.events()),
        }
    }

    /// Gives the delivery task time to emit anything still pending
    pub(crate) async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Connector whose clients fail reads on demand
pub(crate) struct FlakyConnector {
    ensemble: InMemoryEnsemble,
    fail_reads: Arc<AtomicBool>,
}

impl FlakyConnector {
    pub(crate) fn new(ensemble: InMemoryEnsemble) -> Self {
        Self {
            ensemble,
            fail_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn switch(&self) -> Arc<AtomicBool> {
        self.fail_reads.clone()
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        session_timeout: Duration,
        sink: NotificationSink,
    ) -> Result<Arc<dyn CoordinationClient>> {
        let inner = self.ensemble.connect(target, session_timeout, sink).await?;
        Ok(Arc::new(FlakyClient {
            inner,
            fail_reads: self.fail_reads.clone(),
        }))
    }
}

struct FlakyClient {
    inner: Arc<dyn CoordinationClient>,
    fail_reads: Arc<AtomicBool>,
}

impl FlakyClient {
    fn check(
        &self,
        path: &str,
    ) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Fatal(format!("injected read failure on {path}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for FlakyClient {
    fn session_id(&self) -> u64 {
        self.inner.session_id()
    }

    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>> {
        self.check(path)?;
        self.inner.exists(path, watch).await
    }

    async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Bytes, Stat)> {
        self.check(path)?;
        self.inner.get_data(path, watch).await
    }

    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>> {
        self.check(path)?;
        self.inner.get_children(path, watch).await
    }

    async fn create(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<Stat> {
        self.inner.create(path, data).await
    }

    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.inner.delete(path, version).await
    }

    async fn set_data(
        &self,
        path: &str,
        data: Bytes,
        version: Option<i32>,
    ) -> Result<Stat> {
        self.inner.set_data(path, data, version).await
    }

    async fn multi(
        &self,
        ops: Vec<Op>,
    ) -> Result<Vec<OpResult>> {
        self.inner.multi(ops).await
    }

    fn close(&self) {
        self.inner.close()
    }
}
