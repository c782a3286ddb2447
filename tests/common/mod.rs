use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use treewatch::CacheEvent;
use treewatch::CacheListener;
use treewatch::Client;
use treewatch::InMemoryEnsemble;
use treewatch::RetryPolicy;

/// Upper bound for any single wait on cache delivery
pub const WAIT_FOR_EVENTS_IN_MS: u64 = 5000;

/// Quiet period after which no further events are expected
pub const SETTLE_IN_MS: u64 = 50;

pub fn client(ensemble: &InMemoryEnsemble) -> Client {
    Client::builder("127.0.0.1:2181")
        .connector(Arc::new(ensemble.clone()))
        .retry_policy(RetryPolicy {
            base_delay_ms: 10,
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_delay_ms: 100,
        })
        .session_timeout(Duration::from_secs(2))
        .connection_timeout(Duration::from_millis(500))
        .build()
        .expect("client config is valid")
}

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl Recorder {
    pub fn listener(&self) -> impl CacheListener {
        let events = self.events.clone();
        move |event: &CacheEvent| events.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub async fn wait_until(
        &self,
        done: impl Fn(&[CacheEvent]) -> bool,
    ) -> Vec<CacheEvent> {
        let waited = tokio::time::timeout(Duration::from_millis(WAIT_FOR_EVENTS_IN_MS), async {
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
        match waited {
            Ok(events) => events,
            Err(_) => panic!("timed out waiting for events, got {:?}", self.events()),
        }
    }

    pub async fn wait_for(
        &self,
        count: usize,
    ) -> Vec<CacheEvent> {
        self.wait_until(|events| events.len() >= count).await
    }

    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(SETTLE_IN_MS)).await;
    }
}

pub fn paths(events: &[CacheEvent]) -> Vec<String> {
    events.iter().filter_map(|e| e.path()).map(str::to_string).collect()
}
