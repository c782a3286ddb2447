use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::error;
use tracing::trace;

use super::CacheEvent;

/// Receives cache events. Called from the cache's delivery task, one event
/// at a time.
pub trait CacheListener: Send + Sync + 'static {
    fn on_event(
        &self,
        event: &CacheEvent,
    );
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
{
    fn on_event(
        &self,
        event: &CacheEvent,
    ) {
        self(event)
    }
}

/// Handle returned by [`ListenerContainer::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Entries = Vec<(ListenerId, Arc<dyn CacheListener>)>;

#[derive(Default)]
struct Registry {
    entries: ArcSwap<Entries>,
    next_id: AtomicU64,
}

/// Copy-on-write listener set.
///
/// `add`/`remove` swap in a new list, so they never block or corrupt a
/// dispatch that is iterating the previous one.
#[derive(Clone, Default)]
pub struct ListenerContainer {
    inner: Arc<Registry>,
}

impl std::fmt::Debug for ListenerContainer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ListenerContainer").field("len", &self.len()).finish()
    }
}

impl ListenerContainer {
    pub fn add(
        &self,
        listener: impl CacheListener,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn CacheListener> = Arc::new(listener);
        self.inner.entries.rcu(|current| {
            let mut next = Entries::clone(current);
            next.push((id, listener.clone()));
            next
        });
        trace!(?id, "listener added");
        id
    }

    /// `false` when `id` was not registered
    pub fn remove(
        &self,
        id: ListenerId,
    ) -> bool {
        let mut removed = false;
        self.inner.entries.rcu(|current| {
            let next: Entries = current.iter().filter(|(i, _)| *i != id).cloned().collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.entries.store(Arc::new(Entries::new()));
    }

    /// Delivers `event` to every listener in registration order. Stops once
    /// `closed` is set and skips listeners removed since the dispatch began.
    pub(crate) fn dispatch(
        &self,
        event: &CacheEvent,
        closed: &AtomicBool,
    ) {
        let snapshot = self.inner.entries.load_full();
        for (id, listener) in snapshot.iter() {
            if closed.load(Ordering::Acquire) {
                return;
            }
            if !self.contains(*id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!(?id, ?event, "cache listener panicked");
            }
        }
    }

    fn contains(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.entries.load().iter().any(|(i, _)| *i == id)
    }
}
