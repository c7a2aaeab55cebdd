#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end behaviour of the mirror, driven through the raw event adapter.

use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use symsync_core::ChangeKind;
use symsync_core::Delivery;
use symsync_core::ElementInfo;
use symsync_core::EventKind;
use symsync_core::HostError;
use symsync_core::HostQuirks;
use symsync_core::HostResult;
use symsync_core::HostTree;
use symsync_core::MemoryTree;
use symsync_core::MirrorConfig;
use symsync_core::NodeHandle;
use symsync_core::RawAction;
use symsync_core::RawChange;
use symsync_core::SemanticEvent;
use symsync_core::SymbolKind;
use symsync_core::types::SubscriptionToken;
use symsync_test_support::Harness;
use symsync_test_support::kinds;

#[test]
fn test_registration_is_idempotent() {
    let tree = Rc::new(MemoryTree::new());
    let acme = tree.add_namespace(NodeHandle::ROOT, "Acme").unwrap();
    let widget = tree.add_type(acme, "Widget").unwrap();
    let mut h = Harness::build(tree, MirrorConfig::default());
    assert_eq!(h.adapter.engine().index().len(), 1);

    assert_eq!(h.adapter.engine_mut().scan().unwrap(), 0);
    let delivery = h.adapter.on_element_added(acme, widget);
    assert_eq!(delivery, Delivery::Processed);

    assert!(h.take_events().is_empty());
    assert_eq!(h.adapter.engine().index().len(), 1);
    assert!(h.adapter.engine().index().verify());
}

#[test]
fn test_rename_round_trip() {
    let mut h = Harness::new();
    let a = h.namespace("A");
    let b = h.ty(a, "B");

    h.tree.rename(b, "C").unwrap();
    h.pump();

    let events = h.take_events();
    assert_eq!(kinds(&events), vec![EventKind::TypeRenamed]);
    let SemanticEvent::TypeRenamed { old_full_name, ty } = &events[0] else {
        unreachable!()
    };
    assert_eq!(old_full_name, "A.B");
    assert_eq!(ty.full_name, "A.C");
    assert!(h.adapter.engine().lookup("A.B").is_none());
    let node = h.adapter.engine().lookup("A.C").unwrap();
    assert_eq!(node.full_name().unwrap(), "A.C");
}

#[test]
fn test_namespace_delete_cascades_and_unsubscribes() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let core = h.tree.add_namespace(acme, "Core").unwrap();
    h.pump();
    for name in ["Alpha", "Beta", "Gamma"] {
        h.ty(core, name);
    }
    assert!(h.tree.is_subscribed("Acme"));

    h.tree.delete(core).unwrap();
    h.pump();

    let events = h.take_events();
    assert_eq!(kinds(&events), vec![EventKind::TypeRemoved; 3]);
    assert!(h.adapter.engine().index().names_within("Acme.Core").is_empty());
    assert!(!h.adapter.engine().is_monitored("Acme"));
    assert!(!h.tree.is_subscribed("Acme"));
}

#[test]
fn test_namespace_delete_does_not_trust_liveness() {
    let mut h = Harness::with_quirks(HostQuirks {
        lingering_handles: true,
        ..HostQuirks::default()
    });
    let acme = h.namespace("Acme");
    let core = h.tree.add_namespace(acme, "Core").unwrap();
    h.pump();
    for name in ["A", "B", "C"] {
        h.ty(core, name);
    }

    h.tree.delete(core).unwrap();
    assert_eq!(h.pump(), 1);

    assert_eq!(
        h.take_events(),
        ["Acme.Core.A", "Acme.Core.B", "Acme.Core.C"]
            .map(|full_name| SemanticEvent::TypeRemoved {
                full_name: full_name.to_string()
            })
            .to_vec()
    );
    assert!(h.adapter.engine().index().is_empty());
    assert!(!h.tree.is_subscribed("Acme"));
}

#[test]
fn test_repeat_separated_by_other_notification_is_reconciled_again() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let widget = h.ty(acme, "Widget");
    let gadget = h.ty(acme, "Gadget");

    for target in [widget, widget, gadget, widget] {
        h.tree.touch(target, ChangeKind::Unknown).unwrap();
    }
    assert_eq!(h.pump(), 3);

    let changed = |full_name: &str| {
        SemanticEvent::ElementPropertiesChanged(ElementInfo {
            kind: SymbolKind::Type,
            full_name: full_name.to_string(),
        })
    };
    assert_eq!(
        h.take_events(),
        vec![
            changed("Acme.Widget"),
            changed("Acme.Gadget"),
            changed("Acme.Widget"),
        ]
    );
}

#[test]
fn test_double_fired_notifications_collapse() {
    let mut h = Harness::with_quirks(HostQuirks {
        double_fire: true,
        ..HostQuirks::default()
    });
    let acme = h.namespace("Acme");
    h.tree.add_type(acme, "Widget").unwrap();

    let changes = h.tree.take_notifications();
    assert_eq!(changes.len(), 2);
    let deliveries: Vec<Delivery> = changes
        .into_iter()
        .map(|change| h.adapter.deliver(change))
        .collect();

    assert_eq!(deliveries, vec![Delivery::Processed, Delivery::Collapsed]);
    assert_eq!(kinds(&h.take_events()), vec![EventKind::TypeAdded]);
}

#[test]
fn test_repeats_without_collapse_stay_silent() {
    let tree = Rc::new(MemoryTree::with_quirks(HostQuirks {
        double_fire: true,
        ..HostQuirks::default()
    }));
    let config = MirrorConfig {
        collapse_repeated_notifications: false,
        ..MirrorConfig::default()
    };
    let mut h = Harness::build(tree, config);
    let acme = h.namespace("Acme");
    h.tree.add_type(acme, "Widget").unwrap();

    assert_eq!(h.pump(), 2);
    assert_eq!(kinds(&h.take_events()), vec![EventKind::TypeAdded]);
}

#[test]
fn test_ambiguous_short_names() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let other = h.namespace("Other");
    h.ty(acme, "Widget");
    h.ty(other, "Widget");

    let found: Vec<String> = h
        .adapter
        .engine()
        .lookup_by_short_name("Widget")
        .into_iter()
        .map(|node| node.full_name().unwrap())
        .collect();
    assert_eq!(found, vec!["Acme.Widget", "Other.Widget"]);
    assert!(h.adapter.engine().lookup_by_short_name("Gadget").is_empty());
}

#[test]
fn test_silent_removal_is_swept() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    h.ty(acme, "Keep");
    let widget = h.ty(acme, "Widget");

    h.tree.detach(widget).unwrap();
    assert_eq!(h.pump(), 0);
    assert!(h.adapter.engine().lookup("Acme.Widget").is_some());

    let report = h.adapter.engine_mut().sweep();
    assert_eq!(report.removed_types.len(), 1);
    assert_eq!(
        h.take_events(),
        vec![SemanticEvent::TypeRemoved {
            full_name: "Acme.Widget".to_string()
        }]
    );
    assert!(h.adapter.engine_mut().sweep().is_empty());
}

#[test]
fn test_overloads_stay_distinct() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let widget = h.ty(acme, "Widget");
    let long = h
        .tree
        .add_method(widget, "Resize", &[("w", "int"), ("h", "int")])
        .unwrap();
    h.tree.add_method(widget, "Resize", &[("w", "int")]).unwrap();
    h.pump();
    assert_eq!(
        kinds(&h.take_events()),
        vec![EventKind::MethodAdded, EventKind::MethodAdded]
    );

    h.tree.delete(long).unwrap();
    h.pump();

    let events = h.take_events();
    assert_eq!(kinds(&events), vec![EventKind::MethodRemoved]);
    let SemanticEvent::MethodRemoved(member) = &events[0] else {
        unreachable!()
    };
    assert_eq!(member.signature, "Resize(int, int)");
    let engine = h.adapter.engine();
    assert!(engine.lookup_member("Acme.Widget", "Resize(int)").is_some());
    assert_eq!(
        engine
            .members_of("Acme.Widget")
            .iter()
            .filter(|m| m.kind == SymbolKind::Method)
            .count(),
        1
    );
}

#[test]
fn test_failed_reconciliation_is_discarded() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let widget = h.ty(acme, "Widget");
    h.tree.add_property(widget, "Size", "int").unwrap();
    let change = h.tree.take_notifications()[0];

    h.tree.fail_on(widget);
    assert_eq!(h.adapter.deliver(change), Delivery::Discarded);
    assert!(h.take_events().is_empty());

    h.tree.recover(widget);
    h.adapter.clear();
    h.adapter.engine_mut().scan().unwrap();
    assert!(h.adapter.engine().lookup_member("Acme.Widget", "Size").is_some());
}

#[test]
fn test_kind_filtered_listener() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    let removed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&removed);
    let subscription = h
        .adapter
        .engine()
        .bus()
        .subscribe(EventKind::TypeRemoved, move |event| {
            sink.borrow_mut().push(event.clone());
        });

    let widget = h.ty(acme, "Widget");
    h.ty(acme, "Gadget");
    h.tree.delete(widget).unwrap();
    h.pump();
    assert_eq!(removed.borrow().len(), 1);

    drop(subscription);
    let gadget = h.tree.find("Acme.Gadget").unwrap();
    h.tree.delete(gadget).unwrap();
    h.pump();
    assert_eq!(removed.borrow().len(), 1);
    assert_eq!(kinds(&h.take_events()), vec![EventKind::TypeRemoved; 2]);
}

#[test]
fn test_dispose_rejects_notifications() {
    let mut h = Harness::new();
    let acme = h.namespace("Acme");
    h.ty(acme, "Widget");

    h.adapter.dispose();
    assert_eq!(h.tree.subscription_count(), 0);
    assert!(h.adapter.engine().index().is_empty());
    assert_eq!(
        h.adapter.on_element_changed(NodeHandle::ROOT, acme, ChangeKind::Rename),
        Delivery::Rejected
    );
    h.adapter.dispose();
}

#[test]
fn test_excluded_namespaces_from_toml() {
    let config = MirrorConfig::from_toml_str(r#"excluded_namespaces = ["Vendor"]"#).unwrap();
    let mut h = Harness::build(Rc::new(MemoryTree::new()), config);
    let vendor = h.namespace("Vendor");
    let system = h.namespace("System");
    assert!(!h.adapter.engine().is_monitored("Vendor"));
    assert!(h.adapter.engine().is_monitored("System"));

    h.tree.add_type(system, "String").unwrap();
    h.tree.add_type(vendor, "Proxy").unwrap();
    h.pump();
    assert_eq!(kinds(&h.take_events()), vec![EventKind::TypeAdded]);
    assert!(h.adapter.engine().lookup("Vendor.Proxy").is_none());
}

/// Host that refuses every subscription.
struct Unsubscribable(MemoryTree);

impl HostTree for Unsubscribable {
    fn children(&self, node: NodeHandle) -> HostResult<Vec<(SymbolKind, NodeHandle)>> {
        self.0.children(node)
    }

    fn short_name(&self, node: NodeHandle) -> HostResult<String> {
        self.0.short_name(node)
    }

    fn full_name(&self, node: NodeHandle) -> HostResult<String> {
        self.0.full_name(node)
    }

    fn kind(&self, node: NodeHandle) -> HostResult<SymbolKind> {
        self.0.kind(node)
    }

    fn parent(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>> {
        self.0.parent(node)
    }

    fn type_name(&self, node: NodeHandle) -> HostResult<Option<String>> {
        self.0.type_name(node)
    }

    fn base_types(&self, node: NodeHandle) -> HostResult<Vec<String>> {
        self.0.base_types(node)
    }

    fn subscribe(&self, _namespace: NodeHandle) -> HostResult<SubscriptionToken> {
        Err(HostError::failure("subscribe", "read-only project"))
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> HostResult<()> {
        self.0.unsubscribe(token)
    }
}

#[test]
fn test_refused_subscription_leaves_namespace_unmonitored() {
    let tree = MemoryTree::new();
    let acme = tree.add_namespace(NodeHandle::ROOT, "Acme").unwrap();
    let widget = tree.add_type(acme, "Widget").unwrap();
    let host = Rc::new(Unsubscribable(tree));

    let mut adapter = symsync_core::observe(host.clone(), MirrorConfig::default()).unwrap();
    assert_eq!(adapter.engine().monitored_namespaces().count(), 0);
    assert!(adapter.engine().lookup("Acme.Widget").is_some());

    // notifications still reconcile when delivered by other means
    let field = host.0.add_field(widget, "size", "int").unwrap();
    let change = RawChange::new(RawAction::Added, widget, field);
    assert_eq!(adapter.deliver(change), Delivery::Processed);
    assert!(adapter.engine().lookup_member("Acme.Widget", "size").is_some());
}
