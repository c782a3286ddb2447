use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::coordination::node_name;
use crate::coordination::parent_path;
use crate::coordination::validate_path;
use crate::coordination::Connector;
use crate::coordination::CoordinationClient;
use crate::coordination::Notification;
use crate::coordination::NotificationSink;
use crate::coordination::Op;
use crate::coordination::OpResult;
use crate::coordination::SessionState;
use crate::coordination::Stat;
use crate::coordination::WatchEventKind;
use crate::coordination::WatchedEvent;
use crate::coordination::ROOT_PATH;
use crate::utils::time::now_millis;
use crate::ConnectionTarget;
use crate::Error;
use crate::Result;

#[derive(Debug, Clone)]
struct ZNode {
    data: Bytes,
    stat: Stat,
    children: BTreeSet<String>,
}

/// Node tree plus the transaction counter. Cloned for atomic batches.
#[derive(Debug, Clone)]
struct Tree {
    nodes: BTreeMap<String, ZNode>,
    zxid: i64,
}

/// Change that may fire watches once committed
#[derive(Debug)]
enum Trigger {
    Created(String),
    Deleted(String),
    DataChanged(String),
    ChildrenChanged(String),
}

impl Tree {
    fn new() -> Self {
        let now = now_millis();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_PATH.to_string(),
            ZNode {
                data: Bytes::new(),
                stat: Stat {
                    ctime: now,
                    mtime: now,
                    ..Default::default()
                },
                children: BTreeSet::new(),
            },
        );
        Self { nodes, zxid: 0 }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn create(
        &mut self,
        path: &str,
        data: Bytes,
        triggers: &mut Vec<Trigger>,
    ) -> Result<Stat> {
        validate_path(path)?;
        if self.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        let parent = parent_path(path).unwrap_or(ROOT_PATH).to_string();
        if !self.nodes.contains_key(&parent) {
            return Err(Error::NodeMissing(parent));
        }

        let zxid = self.next_zxid();
        let now = now_millis();
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(node_name(path).to_string());
            parent_node.stat.cversion += 1;
            parent_node.stat.pzxid = zxid;
            parent_node.stat.num_children = parent_node.children.len() as i32;
        }

        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            ctime: now,
            mtime: now,
            version: 0,
            cversion: 0,
            data_length: data.len() as i32,
            num_children: 0,
        };
        self.nodes.insert(
            path.to_string(),
            ZNode {
                data,
                stat,
                children: BTreeSet::new(),
            },
        );

        triggers.push(Trigger::Created(path.to_string()));
        triggers.push(Trigger::ChildrenChanged(parent));
        Ok(stat)
    }

    fn delete(
        &mut self,
        path: &str,
        version: Option<i32>,
        triggers: &mut Vec<Trigger>,
    ) -> Result<()> {
        validate_path(path)?;
        if path == ROOT_PATH {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "the root node cannot be deleted",
            });
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
        check_version(path, version, node.stat.version)?;
        if !node.children.is_empty() {
            return Err(Error::NodeNotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        let zxid = self.next_zxid();
        let parent = parent_path(path).unwrap_or(ROOT_PATH).to_string();
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.remove(node_name(path));
            parent_node.stat.cversion += 1;
            parent_node.stat.pzxid = zxid;
            parent_node.stat.num_children = parent_node.children.len() as i32;
        }

        triggers.push(Trigger::Deleted(path.to_string()));
        triggers.push(Trigger::ChildrenChanged(parent));
        Ok(())
    }

    fn set_data(
        &mut self,
        path: &str,
        data: Bytes,
        version: Option<i32>,
        triggers: &mut Vec<Trigger>,
    ) -> Result<Stat> {
        validate_path(path)?;
        let current = self
            .nodes
            .get(path)
            .map(|n| n.stat.version)
            .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
        check_version(path, version, current)?;

        let zxid = self.next_zxid();
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_millis();
        node.stat.data_length = data.len() as i32;
        node.data = data;

        triggers.push(Trigger::DataChanged(path.to_string()));
        Ok(node.stat)
    }

    fn check(
        &self,
        path: &str,
        version: i32,
    ) -> Result<()> {
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
        check_version(path, Some(version), node.stat.version)
    }

    fn apply(
        &mut self,
        op: Op,
        triggers: &mut Vec<Trigger>,
    ) -> Result<OpResult> {
        match op {
            Op::Create { path, data } => self.create(&path, data, triggers).map(OpResult::Created),
            Op::Delete { path, version } => self.delete(&path, version, triggers).map(|_| OpResult::Deleted),
            Op::SetData { path, data, version } => self.set_data(&path, data, version, triggers).map(OpResult::SetData),
            Op::Check { path, version } => self.check(&path, version).map(|_| OpResult::Checked),
        }
    }
}

fn check_version(
    path: &str,
    expected: Option<i32>,
    actual: i32,
) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(Error::BadVersion {
            path: path.to_string(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
enum Link {
    Connected,
    Suspended { since: Instant },
}

#[derive(Debug)]
struct SessionSlot {
    sink: NotificationSink,
    link: Link,
    session_timeout: Duration,
    /// Watch fires held back while the link is down
    pending: Vec<WatchedEvent>,
}

impl SessionSlot {
    fn notify(
        &self,
        notification: Notification,
    ) {
        if self.sink.send(notification).is_err() {
            trace!("session notification stream already dropped");
        }
    }
}

#[derive(Debug)]
struct EnsembleState {
    tree: Tree,
    sessions: HashMap<u64, SessionSlot>,
    /// exists/get_data registrations, one-shot
    data_watches: HashMap<String, HashSet<u64>>,
    /// get_children registrations, one-shot
    child_watches: HashMap<String, HashSet<u64>>,
}

impl EnsembleState {
    fn fire(
        &mut self,
        triggers: Vec<Trigger>,
    ) {
        for trigger in triggers {
            let (kind, path, sessions) = match trigger {
                Trigger::Created(path) => {
                    let sessions = self.data_watches.remove(&path).unwrap_or_default();
                    (WatchEventKind::NodeCreated, path, sessions)
                }
                Trigger::Deleted(path) => {
                    let mut sessions = self.data_watches.remove(&path).unwrap_or_default();
                    sessions.extend(self.child_watches.remove(&path).unwrap_or_default());
                    (WatchEventKind::NodeDeleted, path, sessions)
                }
                Trigger::DataChanged(path) => {
                    let sessions = self.data_watches.remove(&path).unwrap_or_default();
                    (WatchEventKind::NodeDataChanged, path, sessions)
                }
                Trigger::ChildrenChanged(path) => {
                    let sessions = self.child_watches.remove(&path).unwrap_or_default();
                    (WatchEventKind::NodeChildrenChanged, path, sessions)
                }
            };

            for session_id in sessions {
                let Some(slot) = self.sessions.get_mut(&session_id) else {
                    continue;
                };
                let event = WatchedEvent::new(kind, path.clone());
                trace!(session_id, ?event, "watch fired");
                match slot.link {
                    Link::Connected => slot.notify(Notification::Watch(event)),
                    Link::Suspended { .. } => slot.pending.push(event),
                }
            }
        }
    }

    fn drop_session(
        &mut self,
        session_id: u64,
    ) -> Option<SessionSlot> {
        for watchers in self.data_watches.values_mut().chain(self.child_watches.values_mut()) {
            watchers.remove(&session_id);
        }
        self.data_watches.retain(|_, w| !w.is_empty());
        self.child_watches.retain(|_, w| !w.is_empty());
        self.sessions.remove(&session_id)
    }

    fn live_slot(
        &self,
        session_id: u64,
        path: &str,
    ) -> Result<&SessionSlot> {
        match self.sessions.get(&session_id) {
            None => Err(Error::SessionExpired),
            Some(SessionSlot {
                link: Link::Suspended { .. },
                ..
            }) => Err(Error::ConnectionLoss(path.to_string())),
            Some(slot) => Ok(slot),
        }
    }
}

#[derive(Debug)]
struct EnsembleInner {
    state: Mutex<EnsembleState>,
    next_session_id: AtomicU64,
    connect_attempts: AtomicUsize,
    refuse_connections: AtomicBool,
    connect_delay: Mutex<Duration>,
}

/// Shared in-memory ensemble. Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct InMemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl Default for InMemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEnsemble {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnsembleInner {
                state: Mutex::new(EnsembleState {
                    tree: Tree::new(),
                    sessions: HashMap::new(),
                    data_watches: HashMap::new(),
                    child_watches: HashMap::new(),
                }),
                next_session_id: AtomicU64::new(1),
                connect_attempts: AtomicUsize::new(0),
                refuse_connections: AtomicBool::new(false),
                connect_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    //-----------------------------------------------------------
    // Fault injection

    /// Makes every subsequent connection attempt fail (or succeed again)
    pub fn refuse_connections(
        &self,
        refuse: bool,
    ) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Delays every subsequent connection attempt
    pub fn set_connect_delay(
        &self,
        delay: Duration,
    ) {
        *self.inner.connect_delay.lock() = delay;
    }

    /// Drops the link of every currently connected session. Sessions opened
    /// afterwards are unaffected.
    pub fn suspend_sessions(&self) {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        for (session_id, slot) in state.sessions.iter_mut() {
            if matches!(slot.link, Link::Connected) {
                debug!(session_id, "suspending session");
                slot.link = Link::Suspended { since: now };
                slot.notify(Notification::State(SessionState::Disconnected));
            }
        }
    }

    /// Restores suspended sessions. A session suspended for longer than its
    /// session timeout comes back expired.
    pub fn resume_sessions(&self) {
        let mut state = self.inner.state.lock();
        let suspended: Vec<(u64, Instant)> = state
            .sessions
            .iter()
            .filter_map(|(id, slot)| match slot.link {
                Link::Suspended { since } => Some((*id, since)),
                Link::Connected => None,
            })
            .collect();

        for (session_id, since) in suspended {
            let timed_out = state
                .sessions
                .get(&session_id)
                .map(|slot| since.elapsed() >= slot.session_timeout)
                .unwrap_or(false);

            if timed_out {
                info!(session_id, "session expired while suspended");
                if let Some(slot) = state.drop_session(session_id) {
                    slot.notify(Notification::State(SessionState::Expired));
                }
                continue;
            }

            if let Some(slot) = state.sessions.get_mut(&session_id) {
                debug!(session_id, pending = slot.pending.len(), "resuming session");
                slot.link = Link::Connected;
                slot.notify(Notification::State(SessionState::Connected));
                for event in std::mem::take(&mut slot.pending) {
                    slot.notify(Notification::Watch(event));
                }
            }
        }
    }

    /// Expires every live session immediately
    pub fn expire_sessions(&self) {
        let mut state = self.inner.state.lock();
        let ids: Vec<u64> = state.sessions.keys().copied().collect();
        for session_id in ids {
            info!(session_id, "expiring session");
            if let Some(slot) = state.drop_session(session_id) {
                slot.notify(Notification::State(SessionState::Expired));
            }
        }
    }

    //-----------------------------------------------------------
    // Inspection

    pub fn active_sessions(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Outstanding one-shot registrations (data + child) across all sessions
    pub fn watch_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.data_watches.values().map(HashSet::len).sum::<usize>()
            + state.child_watches.values().map(HashSet::len).sum::<usize>()
    }

    pub fn node_exists(
        &self,
        path: &str,
    ) -> bool {
        self.inner.state.lock().tree.nodes.contains_key(path)
    }

    pub fn node_data(
        &self,
        path: &str,
    ) -> Option<Bytes> {
        self.inner.state.lock().tree.nodes.get(path).map(|n| n.data.clone())
    }

    /// Every path strictly below `path`, in lexical order
    pub fn descendants(
        &self,
        path: &str,
    ) -> Vec<String> {
        let prefix = if path == ROOT_PATH {
            ROOT_PATH.to_string()
        } else {
            format!("{path}/")
        };
        self.inner
            .state
            .lock()
            .tree
            .nodes
            .keys()
            .filter(|p| p.as_str() != ROOT_PATH && p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn close_session(
        &self,
        session_id: u64,
    ) {
        let mut state = self.inner.state.lock();
        if let Some(slot) = state.drop_session(session_id) {
            debug!(session_id, "session closed");
            slot.notify(Notification::State(SessionState::Closed));
        }
    }
}

#[async_trait]
impl Connector for InMemoryEnsemble {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        session_timeout: Duration,
        sink: NotificationSink,
    ) -> Result<Arc<dyn CoordinationClient>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            debug!(%target, "connection refused");
            return Err(Error::ConnectionLoss(target.to_string()));
        }

        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let slot = SessionSlot {
            sink,
            link: Link::Connected,
            session_timeout,
            pending: Vec::new(),
        };
        slot.notify(Notification::State(SessionState::Connected));
        self.inner.state.lock().sessions.insert(session_id, slot);
        debug!(session_id, %target, "session established");

        Ok(Arc::new(MemoryClient {
            session_id,
            ensemble: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One session's view of an [`InMemoryEnsemble`]
#[derive(Debug)]
pub struct MemoryClient {
    session_id: u64,
    ensemble: InMemoryEnsemble,
    closed: AtomicBool,
}

impl MemoryClient {
    fn with_state<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut EnsembleState, u64) -> Result<T>,
    ) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLoss(path.to_string()));
        }
        let mut state = self.ensemble.inner.state.lock();
        state.live_slot(self.session_id, path)?;
        f(&mut *state, self.session_id)
    }

    fn mutate<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut Tree, &mut Vec<Trigger>) -> Result<T>,
    ) -> Result<T> {
        self.with_state(path, |state, _| {
            let mut triggers = Vec::new();
            let out = f(&mut state.tree, &mut triggers)?;
            state.fire(triggers);
            Ok(out)
        })
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>> {
        validate_path(path)?;
        self.with_state(path, |state, session_id| {
            if watch {
                state.data_watches.entry(path.to_string()).or_default().insert(session_id);
            }
            Ok(state.tree.nodes.get(path).map(|n| n.stat))
        })
    }

    async fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Bytes, Stat)> {
        validate_path(path)?;
        self.with_state(path, |state, session_id| {
            let node = state
                .tree
                .nodes
                .get(path)
                .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
            let out = (node.data.clone(), node.stat);
            if watch {
                state.data_watches.entry(path.to_string()).or_default().insert(session_id);
            }
            Ok(out)
        })
    }

    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>> {
        validate_path(path)?;
        self.with_state(path, |state, session_id| {
            let node = state
                .tree
                .nodes
                .get(path)
                .ok_or_else(|| Error::NodeMissing(path.to_string()))?;
            let children = node.children.iter().cloned().collect();
            if watch {
                state.child_watches.entry(path.to_string()).or_default().insert(session_id);
            }
            Ok(children)
        })
    }

    async fn create(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<Stat> {
        self.mutate(path, |tree, triggers| tree.create(path, data, triggers))
    }

    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.mutate(path, |tree, triggers| tree.delete(path, version, triggers))
    }

    async fn set_data(
        &self,
        path: &str,
        data: Bytes,
        version: Option<i32>,
    ) -> Result<Stat> {
        self.mutate(path, |tree, triggers| tree.set_data(path, data, version, triggers))
    }

    async fn multi(
        &self,
        ops: Vec<Op>,
    ) -> Result<Vec<OpResult>> {
        let first = ops.first().map(|op| op.path().to_string()).unwrap_or_default();
        self.with_state(&first, |state, _| {
            let mut scratch = state.tree.clone();
            let mut triggers = Vec::new();
            let mut results = Vec::with_capacity(ops.len());
            for op in ops {
                results.push(scratch.apply(op, &mut triggers)?);
            }
            state.tree = scratch;
            state.fire(triggers);
            Ok(results)
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ensemble.close_session(self.session_id);
        }
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.close();
    }
}
