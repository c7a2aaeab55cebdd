#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Shared harness for the mirror integration tests.

use std::cell::RefCell;
use std::rc::Rc;
use symsync_core::HostQuirks;
use symsync_core::MemoryTree;
use symsync_core::MirrorConfig;
use symsync_core::NodeHandle;
use symsync_core::RawEventAdapter;
use symsync_core::SemanticEvent;
use symsync_core::Subscription;

/// A memory host wired to a mirror, with every published event recorded.
pub struct Harness {
    pub tree: Rc<MemoryTree>,
    pub adapter: RawEventAdapter,
    events: Rc<RefCell<Vec<SemanticEvent>>>,
    _listener: Subscription,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Rc::new(MemoryTree::new()), MirrorConfig::default())
    }

    pub fn with_quirks(quirks: HostQuirks) -> Self {
        Self::build(
            Rc::new(MemoryTree::with_quirks(quirks)),
            MirrorConfig::default(),
        )
    }

    /// Observes a tree that may already hold content.
    pub fn build(tree: Rc<MemoryTree>, config: MirrorConfig) -> Self {
        tree.take_notifications();
        let adapter = symsync_core::observe(tree.clone(), config).expect("observe");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let listener = adapter
            .engine()
            .bus()
            .subscribe_all(move |event| sink.borrow_mut().push(event.clone()));
        Self {
            tree,
            adapter,
            events,
            _listener: listener,
        }
    }

    /// Routes queued host notifications through the adapter. Returns how
    /// many were processed.
    pub fn pump(&mut self) -> usize {
        let changes = self.tree.take_notifications();
        self.adapter.deliver_all(changes)
    }

    pub fn take_events(&self) -> Vec<SemanticEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn namespace(&mut self, name: &str) -> NodeHandle {
        let handle = self.tree.add_namespace(NodeHandle::ROOT, name).unwrap();
        self.pump();
        handle
    }

    /// Adds a type, reconciles it and forgets the resulting events.
    pub fn ty(&mut self, parent: NodeHandle, name: &str) -> NodeHandle {
        let handle = self.tree.add_type(parent, name).unwrap();
        self.pump();
        self.take_events();
        handle
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Variant tags of `events`, for compact assertions.
pub fn kinds(events: &[SemanticEvent]) -> Vec<symsync_core::EventKind> {
    events.iter().map(SemanticEvent::kind).collect()
}
