//! Bookkeeping for one-shot watches.
//!
//! Every watched read marks its slot `Armed`; every fired watch marks it
//! `Consumed`. After each notification the engine walks the consumed slots
//! and re-registers whatever is still needed, so a missed re-arm shows up as
//! a slot stuck in `Consumed` instead of silently vanishing.

use dashmap::DashMap;

use crate::coordination::depth_below;
use crate::coordination::WatchEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum WatchKind {
    /// Data or existence watch (`get_data` / `exists`)
    Data,
    /// Child list watch (`get_children`)
    Children,
}

impl WatchKind {
    /// Registrations a fired event uses up
    pub(crate) fn consumed_by(kind: WatchEventKind) -> &'static [WatchKind] {
        match kind {
            WatchEventKind::NodeCreated | WatchEventKind::NodeDataChanged => &[WatchKind::Data],
            WatchEventKind::NodeChildrenChanged => &[WatchKind::Children],
            WatchEventKind::NodeDeleted => &[WatchKind::Data, WatchKind::Children],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchSlot {
    Armed,
    Consumed,
}

#[derive(Debug, Default)]
pub(crate) struct WatchLedger {
    slots: DashMap<(String, WatchKind), WatchSlot>,
}

impl WatchLedger {
    pub(crate) fn arm(
        &self,
        path: &str,
        kind: WatchKind,
    ) {
        self.slots.insert((path.to_string(), kind), WatchSlot::Armed);
    }

    /// Records a fire. Unknown slots are recorded too, so coverage is
    /// re-checked even for registrations this ledger never saw.
    pub(crate) fn consume(
        &self,
        path: &str,
        kind: WatchKind,
    ) {
        self.slots.insert((path.to_string(), kind), WatchSlot::Consumed);
    }

    pub(crate) fn is_consumed(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> bool {
        matches!(
            self.slots.get(&(path.to_string(), kind)).map(|slot| *slot),
            Some(WatchSlot::Consumed)
        )
    }

    pub(crate) fn forget(
        &self,
        path: &str,
        kind: WatchKind,
    ) {
        self.slots.remove(&(path.to_string(), kind));
    }

    /// Drops `path` and everything below it
    pub(crate) fn forget_subtree(
        &self,
        path: &str,
    ) {
        self.slots.retain(|(p, _), _| depth_below(path, p).is_none());
    }

    /// Consumed slots, parents before children
    pub(crate) fn consumed(&self) -> Vec<(String, WatchKind)> {
        let mut out: Vec<(String, WatchKind)> = self
            .slots
            .iter()
            .filter(|entry| *entry.value() == WatchSlot::Consumed)
            .map(|entry| entry.key().clone())
            .collect();
        out.sort();
        out
    }

    pub(crate) fn armed_count(&self) -> usize {
        self.slots.iter().filter(|entry| *entry.value() == WatchSlot::Armed).count()
    }

    pub(crate) fn clear(&self) {
        self.slots.clear();
    }
}
