//! Mirror synchronization shared by every cache variant.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::watch_ledger::WatchKind;
use super::watch_ledger::WatchLedger;
use super::CacheEvent;
use super::CacheLifecycle;
use super::ListenerContainer;
use super::Scope;
use crate::coordination::depth_below;
use crate::coordination::join_path;
use crate::coordination::node_name;
use crate::coordination::parent_path;
use crate::coordination::NodeRecord;
use crate::coordination::Notification;
use crate::coordination::NotificationStream;
use crate::coordination::SessionState;
use crate::coordination::WatchedEvent;
use crate::metrics::CACHE_EVENTS_DISPATCHED;
use crate::metrics::WATCH_REARM_FAILURES;
use crate::session::Session;
use crate::CacheConfig;
use crate::Error;
use crate::Result;

/// State readable from the cache handle while the delivery task runs
#[derive(Debug)]
pub(crate) struct CacheShared {
    pub(crate) id: String,
    pub(crate) root: String,
    pub(crate) scope: Scope,
    pub(crate) mirror: RwLock<BTreeMap<String, NodeRecord>>,
    pub(crate) listeners: ListenerContainer,
    pub(crate) ledger: WatchLedger,
    lifecycle: RwLock<CacheLifecycle>,
    synchronized: AtomicBool,
    closed: AtomicBool,
}

impl CacheShared {
    pub(crate) fn new(
        root: String,
        scope: Scope,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(8),
            root,
            scope,
            mirror: RwLock::new(BTreeMap::new()),
            listeners: ListenerContainer::default(),
            ledger: WatchLedger::default(),
            lifecycle: RwLock::new(CacheLifecycle::Latent),
            synchronized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    fn set_synchronized(
        &self,
        value: bool,
    ) {
        self.synchronized.store(value, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn lifecycle(&self) -> CacheLifecycle {
        *self.lifecycle.read()
    }

    pub(crate) fn set_lifecycle(
        &self,
        lifecycle: CacheLifecycle,
    ) {
        *self.lifecycle.write() = lifecycle;
    }

    /// Mirrored direct children of `path`
    pub(crate) fn child_records(
        &self,
        path: &str,
    ) -> BTreeMap<String, NodeRecord> {
        self.mirror
            .read()
            .iter()
            .filter(|(key, _)| depth_below(path, key) == Some(1))
            .map(|(key, record)| (node_name(key).to_string(), record.clone()))
            .collect()
    }

    /// Inserts or replaces a record. Returns `true` for a new path.
    fn upsert(
        &self,
        record: NodeRecord,
        events: &mut Vec<CacheEvent>,
    ) -> bool {
        let mut mirror = self.mirror.write();
        match mirror.insert(record.path.clone(), record.clone()) {
            None => {
                events.push(CacheEvent::Added(record));
                true
            }
            Some(old) => {
                if old.stat != record.stat || old.data != record.data {
                    events.push(CacheEvent::Updated(record));
                }
                false
            }
        }
    }

    /// Drops `path` and its descendants, deepest first
    fn remove_subtree(
        &self,
        path: &str,
        events: &mut Vec<CacheEvent>,
    ) {
        let mut mirror = self.mirror.write();
        let mut doomed: Vec<(usize, String)> = mirror
            .keys()
            .filter_map(|key| depth_below(path, key).map(|depth| (depth, key.clone())))
            .collect();
        doomed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        for (_, key) in doomed {
            if let Some(record) = mirror.remove(&key) {
                events.push(CacheEvent::Removed(record));
            }
        }
    }
}

/// How much of a node a refresh re-reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    Data,
    Children,
    /// Data, then every child recursively
    Full,
}

enum Fetched {
    Added,
    Present,
    /// Gone. `true` when the root reappeared while arming its creation watch.
    Missing(bool),
}

enum Listing {
    /// Children to load next
    Visit(Vec<String>),
    /// Gone, same flag as [`Fetched::Missing`]
    Missing(bool),
}

/// What the delivery task does before it starts reading notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initial {
    Nothing,
    Populate,
    AnnounceInitialized,
}

/// Pending retry of watches that could not be re-registered
#[derive(Debug, Clone, Copy)]
struct Repair {
    round: usize,
    at: Instant,
    /// Re-read the whole scope instead of only the consumed slots
    full: bool,
}

enum Wake {
    Notification(Notification),
    Repair,
}

/// Owns the session and keeps the mirror in line with the service
pub(crate) struct Engine {
    shared: Arc<CacheShared>,
    session: Session,
    config: CacheConfig,
    root_exists: bool,
    /// Set from a disconnect or expiry until the next successful resync
    suspended: bool,
    /// Coverage lost and already reported; cleared once it is restored
    degraded: bool,
    repair: Option<Repair>,
}

impl Engine {
    pub(crate) fn new(
        shared: Arc<CacheShared>,
        session: Session,
        config: CacheConfig,
    ) -> Self {
        Self {
            shared,
            session,
            config,
            root_exists: false,
            suspended: false,
            degraded: false,
            repair: None,
        }
    }

    /// Loads the whole scope without telling listeners
    pub(crate) async fn populate_silently(&mut self) -> Result<()> {
        let root = self.shared.root.clone();
        let mut discarded = Vec::new();
        self.sync_path(&root, Refresh::Full, &mut discarded).await?;
        self.shared.set_synchronized(true);
        debug!(cache = %self.shared.id, nodes = self.shared.mirror.read().len(), "initial snapshot built");
        Ok(())
    }

    pub(crate) async fn run(
        mut self,
        mut notifications: NotificationStream,
        cancel: CancellationToken,
        initial: Initial,
    ) -> Result<()> {
        match initial {
            Initial::Nothing => {}
            Initial::AnnounceInitialized => self.dispatch(vec![CacheEvent::Initialized]),
            Initial::Populate => {
                let root = self.shared.root.clone();
                let mut events = Vec::new();
                let populated = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    r = self.sync_path(&root, Refresh::Full, &mut events) => r,
                };
                match populated {
                    Ok(()) => self.shared.set_synchronized(true),
                    Err(e) => {
                        self.rearm_failed(&root, e.to_string(), &mut events);
                        self.schedule_repair(true);
                    }
                }
                self.dispatch(events);
            }
        }

        loop {
            let repair_at = self.repair.map(|r| r.at);
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(cache = %self.shared.id, "delivery task cancelled");
                    return Ok(());
                }
                n = notifications.recv() => match n {
                    Some(n) => Wake::Notification(n),
                    None => return Ok(()),
                },
                _ = repair_due(repair_at) => Wake::Repair,
            };
            if self.shared.is_closed() {
                return Ok(());
            }

            let handled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                r = self.wake(wake) => r,
            };
            if let Err(e) = handled {
                self.give_up(&e);
                return Err(e);
            }
        }
    }

    async fn wake(
        &mut self,
        wake: Wake,
    ) -> Result<()> {
        match wake {
            Wake::Notification(notification) => self.handle(notification).await,
            Wake::Repair => {
                self.run_repair().await;
                Ok(())
            }
        }
    }

    async fn handle(
        &mut self,
        notification: Notification,
    ) -> Result<()> {
        match notification {
            Notification::Watch(event) => {
                self.on_watch(event).await;
                Ok(())
            }
            Notification::State(state) => self.on_state(state).await,
        }
    }

    async fn on_watch(
        &mut self,
        event: WatchedEvent,
    ) {
        trace!(cache = %self.shared.id, ?event, "watch fired");
        for kind in WatchKind::consumed_by(event.kind) {
            self.shared.ledger.consume(&event.path, *kind);
        }
        let mut events = Vec::new();
        let covered = self.ensure_coverage(&mut events).await;
        self.dispatch(events);
        if !covered {
            self.schedule_repair(false);
        } else if self.degraded && !self.repair.is_some_and(|r| r.full) {
            self.coverage_restored();
        }
    }

    async fn on_state(
        &mut self,
        state: SessionState,
    ) -> Result<()> {
        debug!(cache = %self.shared.id, ?state, "session state changed");
        match state {
            SessionState::Disconnected => {
                if !self.suspended {
                    self.suspended = true;
                    self.shared.set_synchronized(false);
                    self.dispatch(vec![CacheEvent::ConnectionSuspended]);
                }
            }
            SessionState::Connected => {
                if self.suspended && self.resync().await {
                    self.suspended = false;
                    self.dispatch(vec![CacheEvent::ConnectionReconnected]);
                }
            }
            SessionState::Expired => {
                self.suspended = true;
                self.repair = None;
                self.shared.set_synchronized(false);
                self.shared.ledger.clear();
                self.dispatch(vec![CacheEvent::ConnectionLost]);
                if let Err(e) = self.rebuild_session().await {
                    return Err(Error::WatchRegistration {
                        path: self.shared.root.clone(),
                        reason: format!("session could not be re-established: {e}"),
                    });
                }
            }
            SessionState::Closed => {}
        }
        Ok(())
    }

    /// Re-reads the whole scope and re-arms every watch. Returns `false` when
    /// the session dropped again and a later reconnect has to retry.
    async fn resync(&mut self) -> bool {
        let root = self.shared.root.clone();
        let attempts = self.config.max_resync_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let mut events = Vec::new();
            let result = self.sync_path(&root, Refresh::Full, &mut events).await;
            self.dispatch(events);
            match result {
                Ok(()) => {
                    self.shared.set_synchronized(true);
                    self.degraded = false;
                    self.repair = None;
                    info!(cache = %self.shared.id, attempt, "mirror resynchronized");
                    return true;
                }
                Err(e) if e.is_session_fault() => {
                    debug!(cache = %self.shared.id, "session dropped during resync: {:?}", e);
                    return false;
                }
                Err(e) => {
                    warn!(cache = %self.shared.id, attempt, "resync failed: {:?}", e);
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        let mut events = Vec::new();
        self.rearm_failed(&root, reason, &mut events);
        self.dispatch(events);
        self.schedule_repair(true);
        true
    }

    /// Retries whatever the last failure left uncovered
    async fn run_repair(&mut self) {
        let Some(repair) = self.repair.take() else {
            return;
        };
        // the resync after reconnecting covers everything
        if self.suspended {
            return;
        }

        let mut events = Vec::new();
        let healed = if repair.full {
            let root = self.shared.root.clone();
            match self.sync_path(&root, Refresh::Full, &mut events).await {
                Ok(()) => true,
                Err(e) => {
                    self.rearm_failed(&root, e.to_string(), &mut events);
                    false
                }
            }
        } else {
            self.ensure_coverage(&mut events).await
        };
        self.dispatch(events);

        if healed {
            self.coverage_restored();
        } else {
            self.repair = Some(Repair {
                round: repair.round + 1,
                at: Instant::now() + self.session.retry_policy().delay_for(repair.round + 1),
                full: repair.full,
            });
        }
    }

    fn schedule_repair(
        &mut self,
        full: bool,
    ) {
        match &mut self.repair {
            Some(repair) => repair.full |= full,
            None => {
                self.repair = Some(Repair {
                    round: 0,
                    at: Instant::now() + self.session.retry_policy().delay_for(0),
                    full,
                })
            }
        }
    }

    fn coverage_restored(&mut self) {
        self.degraded = false;
        self.repair = None;
        if !self.suspended {
            self.shared.set_synchronized(true);
        }
        info!(cache = %self.shared.id, "watch coverage restored");
    }

    /// Ends the cache after a failure it cannot recover from
    fn give_up(
        &self,
        error: &Error,
    ) {
        error!(cache = %self.shared.id, "cache stopped: {:?}", error);
        WATCH_REARM_FAILURES.inc();
        self.shared.set_synchronized(false);
        let reason = match error {
            Error::WatchRegistration { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        self.dispatch(vec![CacheEvent::WatchRegistrationFailed {
            path: self.shared.root.clone(),
            reason,
        }]);
        self.shared.mark_closed();
        self.shared.set_lifecycle(CacheLifecycle::Closed);
    }

    async fn rebuild_session(&mut self) -> Result<()> {
        let limit = self.config.max_session_rebuilds;
        let mut round = 0;
        loop {
            round += 1;
            match self.session.restart().await {
                Ok(()) => {
                    info!(cache = %self.shared.id, round, "session rebuilt after expiry");
                    return Ok(());
                }
                Err(e) => {
                    if limit != 0 && round >= limit {
                        error!(cache = %self.shared.id, round, "giving up rebuilding session: {:?}", e);
                        return Err(e);
                    }
                    warn!(cache = %self.shared.id, round, "session rebuild failed: {:?}", e);
                    sleep(self.session.retry_policy().delay_for(round - 1)).await;
                }
            }
        }
    }

    /// Re-registers every consumed watch that is still needed. Returns
    /// `false` when some of them could not be.
    async fn ensure_coverage(
        &mut self,
        events: &mut Vec<CacheEvent>,
    ) -> bool {
        let mut covered = true;
        for (path, kind) in self.shared.ledger.consumed() {
            if !self.requires(&path, kind) {
                self.shared.ledger.forget(&path, kind);
                continue;
            }
            let refresh = match kind {
                WatchKind::Data => Refresh::Data,
                WatchKind::Children => Refresh::Children,
            };
            if let Err(e) = self.sync_path(&path, refresh, events).await {
                self.rearm_failed(&path, e.to_string(), events);
                covered = false;
                continue;
            }
            if self.shared.ledger.is_consumed(&path, kind) {
                if self.requires(&path, kind) {
                    self.rearm_failed(&path, format!("{kind:?} watch was not re-registered"), events);
                    covered = false;
                } else {
                    self.shared.ledger.forget(&path, kind);
                }
            }
        }
        covered
    }

    /// Whether a `kind` watch on `path` is part of this cache's coverage
    fn requires(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> bool {
        let Some(depth) = depth_below(&self.shared.root, path) else {
            return false;
        };
        let scope = self.shared.scope;
        if path == self.shared.root {
            return match kind {
                // creation watch while missing
                WatchKind::Data => !self.root_exists || scope.tracks_data(0),
                WatchKind::Children => self.root_exists && scope.tracks_children(0),
            };
        }
        match kind {
            WatchKind::Data => {
                scope.tracks_data(depth) && (self.is_present(path) || parent_path(path).is_some_and(|p| self.is_present(p)))
            }
            WatchKind::Children => scope.tracks_children(depth) && self.is_present(path),
        }
    }

    fn is_present(
        &self,
        path: &str,
    ) -> bool {
        if path == self.shared.root {
            return self.root_exists;
        }
        self.shared.mirror.read().contains_key(path)
    }

    /// Reads `start` and whatever below it the refresh kind calls for, arming
    /// watches on everything read. Nodes are visited parents first, siblings
    /// in name order.
    async fn sync_path(
        &mut self,
        start: &str,
        refresh: Refresh,
        events: &mut Vec<CacheEvent>,
    ) -> Result<()> {
        let scope = self.shared.scope;
        let mut pending = vec![(start.to_string(), refresh)];

        while let Some((path, refresh)) = pending.pop() {
            let Some(depth) = depth_below(&self.shared.root, &path) else {
                continue;
            };

            let mut list_children = refresh != Refresh::Data;
            let mut revisit = refresh == Refresh::Full;
            if refresh != Refresh::Children && scope.tracks_data(depth) {
                match self.sync_data(&path, events).await? {
                    Fetched::Missing(reappeared) => {
                        if reappeared {
                            pending.push((path, Refresh::Full));
                        }
                        continue;
                    }
                    Fetched::Added => {
                        list_children = true;
                        revisit = true;
                    }
                    Fetched::Present => {}
                }
            } else if refresh == Refresh::Data {
                // the root's existence watch fired but its data is not mirrored
                list_children = true;
            }

            if !list_children || !scope.tracks_children(depth) {
                continue;
            }
            match self.sync_children(&path, revisit, events).await? {
                Listing::Visit(mut visit) => {
                    visit.sort_unstable_by(|a, b| b.cmp(a));
                    pending.extend(visit.into_iter().map(|p| (p, Refresh::Full)));
                }
                Listing::Missing(true) => pending.push((path, Refresh::Full)),
                Listing::Missing(false) => {}
            }
        }
        Ok(())
    }

    async fn sync_data(
        &mut self,
        path: &str,
        events: &mut Vec<CacheEvent>,
    ) -> Result<Fetched> {
        match self.session.get_data(path, true).await {
            Ok((data, stat)) => {
                self.shared.ledger.arm(path, WatchKind::Data);
                if path == self.shared.root {
                    self.root_exists = true;
                }
                let added = self.shared.upsert(NodeRecord::new(path, data, stat), events);
                Ok(if added { Fetched::Added } else { Fetched::Present })
            }
            Err(Error::NodeMissing(_)) => Ok(Fetched::Missing(self.node_vanished(path, events).await?)),
            Err(e) => Err(e),
        }
    }

    /// Lists and diffs the children of `path`. The children to load next are
    /// the new ones, or all of them with `revisit`.
    async fn sync_children(
        &mut self,
        path: &str,
        revisit: bool,
        events: &mut Vec<CacheEvent>,
    ) -> Result<Listing> {
        let names = match self.session.get_children(path, true).await {
            Ok(names) => names,
            Err(Error::NodeMissing(_)) => return Ok(Listing::Missing(self.node_vanished(path, events).await?)),
            Err(e) => return Err(e),
        };
        self.shared.ledger.arm(path, WatchKind::Children);
        if path == self.shared.root {
            self.root_exists = true;
        }

        let names: BTreeSet<String> = names.into_iter().collect();
        for stale in self.shared.child_records(path).into_keys() {
            if !names.contains(&stale) {
                let stale = join_path(path, &stale);
                self.shared.ledger.forget_subtree(&stale);
                self.shared.remove_subtree(&stale, events);
            }
        }

        let visit = {
            let mirror = self.shared.mirror.read();
            names
                .iter()
                .map(|name| join_path(path, name))
                .filter(|child| revisit || !mirror.contains_key(child))
                .collect()
        };
        Ok(Listing::Visit(visit))
    }

    /// Drops a node that no longer exists. For the root, arms a creation
    /// watch and reports whether the root came back in the meantime.
    async fn node_vanished(
        &mut self,
        path: &str,
        events: &mut Vec<CacheEvent>,
    ) -> Result<bool> {
        self.shared.ledger.forget_subtree(path);
        self.shared.remove_subtree(path, events);
        if path != self.shared.root {
            return Ok(false);
        }

        self.root_exists = false;
        let stat = self.session.exists(path, true).await?;
        self.shared.ledger.arm(path, WatchKind::Data);
        Ok(stat.is_some())
    }

    /// Reported to listeners once per loss of coverage; retries that keep
    /// failing are only logged.
    fn rearm_failed(
        &mut self,
        path: &str,
        reason: String,
        events: &mut Vec<CacheEvent>,
    ) {
        WATCH_REARM_FAILURES.inc();
        self.shared.set_synchronized(false);
        if self.degraded {
            debug!(cache = %self.shared.id, path, %reason, "watch still not re-registered");
            return;
        }
        self.degraded = true;
        warn!(cache = %self.shared.id, path, %reason, "watch coverage lost");
        events.push(CacheEvent::WatchRegistrationFailed {
            path: path.to_string(),
            reason,
        });
    }

    fn dispatch(
        &self,
        events: Vec<CacheEvent>,
    ) {
        for event in events {
            if self.shared.is_closed() {
                return;
            }
            CACHE_EVENTS_DISPATCHED.with_label_values(&[event.kind()]).inc();
            self.shared.listeners.dispatch(&event, &self.shared.closed);
        }
    }
}

async fn repair_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
