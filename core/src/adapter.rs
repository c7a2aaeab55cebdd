//! Normalization of native host notifications
//!
//! The host reports `ElementAdded`, `ElementChanged(kind)` and
//! `ElementDeleted`. Each becomes a [`RawChange`], passes the dedup guard and
//! is handed to the [`Reconciler`] on the calling thread.

use crate::engine::Reconciler;
use crate::types::ChangeKind;
use crate::types::NodeHandle;
use tracing::trace;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawAction {
    Added,
    Changed(ChangeKind),
    Deleted,
}

/// Normalized host notification, before semantic interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawChange {
    pub action: RawAction,
    pub parent: NodeHandle,
    pub element: NodeHandle,
}

impl RawChange {
    pub const fn new(action: RawAction, parent: NodeHandle, element: NodeHandle) -> Self {
        Self {
            action,
            parent,
            element,
        }
    }
}

/// Collapses a notification that repeats the one just before it.
///
/// Only exact immediate repeats are dropped; any intervening notification
/// resets the guard.
#[derive(Debug, Default, Clone)]
pub struct DedupGuard {
    last: Option<RawChange>,
}

impl DedupGuard {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Returns `false` when `change` is an immediate repeat.
    pub fn admit(&mut self, change: RawChange) -> bool {
        if self.last == Some(change) {
            return false;
        }
        self.last = Some(change);
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Outcome of handing one notification to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Processed,
    /// Immediate repeat collapsed by the dedup guard.
    Collapsed,
    /// Reconciliation failed; the notification was logged and discarded.
    Discarded,
    /// The mirror has been disposed.
    Rejected,
}

/// Entry point for host callbacks. Owns the reconciliation engine.
#[derive(Debug)]
pub struct RawEventAdapter {
    engine: Reconciler,
    guard: DedupGuard,
}

impl RawEventAdapter {
    pub fn new(engine: Reconciler) -> Self {
        Self {
            engine,
            guard: DedupGuard::new(),
        }
    }

    pub fn on_element_added(&mut self, parent: NodeHandle, element: NodeHandle) -> Delivery {
        self.deliver(RawChange::new(RawAction::Added, parent, element))
    }

    pub fn on_element_changed(
        &mut self,
        parent: NodeHandle,
        element: NodeHandle,
        kind: ChangeKind,
    ) -> Delivery {
        self.deliver(RawChange::new(RawAction::Changed(kind), parent, element))
    }

    pub fn on_element_deleted(&mut self, parent: NodeHandle, element: NodeHandle) -> Delivery {
        self.deliver(RawChange::new(RawAction::Deleted, parent, element))
    }

    /// Single notification boundary: nothing raised while reconciling
    /// escapes past this point.
    pub fn deliver(&mut self, change: RawChange) -> Delivery {
        if self.engine.is_disposed() {
            trace!(?change, "notification after dispose");
            return Delivery::Rejected;
        }
        if self.engine.config().collapse_repeated_notifications && !self.guard.admit(change) {
            trace!(?change, "collapsed repeated notification");
            return Delivery::Collapsed;
        }
        match self.engine.process(&change) {
            Ok(()) => Delivery::Processed,
            Err(err) => {
                warn!(?change, error = %err, "dropping notification");
                Delivery::Discarded
            }
        }
    }

    /// Delivers a batch in order and returns how many were processed.
    pub fn deliver_all(&mut self, changes: impl IntoIterator<Item = RawChange>) -> usize {
        changes
            .into_iter()
            .filter(|change| self.deliver(*change) == Delivery::Processed)
            .count()
    }

    pub const fn engine(&self) -> &Reconciler {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Reconciler {
        &mut self.engine
    }

    /// Drops indices and subscriptions but keeps accepting notifications.
    pub fn clear(&mut self) {
        self.guard.reset();
        self.engine.clear();
    }

    pub fn dispose(&mut self) {
        self.guard.reset();
        self.engine.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_collapses_only_immediate_repeats() {
        let a = RawChange::new(RawAction::Added, NodeHandle(1), NodeHandle(2));
        let b = RawChange::new(RawAction::Deleted, NodeHandle(1), NodeHandle(3));
        let mut guard = DedupGuard::new();

        assert!(guard.admit(a));
        assert!(!guard.admit(a));
        assert!(guard.admit(b));
        assert!(guard.admit(a));

        guard.reset();
        assert!(guard.admit(a));
    }

    #[test]
    fn test_guard_distinguishes_change_kinds() {
        let rename = RawChange::new(
            RawAction::Changed(ChangeKind::Rename),
            NodeHandle(1),
            NodeHandle(2),
        );
        let retype = RawChange::new(
            RawAction::Changed(ChangeKind::TypeRefChange),
            NodeHandle(1),
            NodeHandle(2),
        );
        let mut guard = DedupGuard::new();
        assert!(guard.admit(rename));
        assert!(guard.admit(retype));
    }
}
