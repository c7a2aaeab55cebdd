//! Semantic events and the bus that delivers them
//!
//! Listeners subscribe to one [`EventKind`] or to everything and get back a
//! [`Subscription`] guard; dropping the guard detaches the listener. Events
//! only carry resolved names, never host handles.

use crate::types::ElementInfo;
use crate::types::MemberInfo;
use crate::types::SymbolKind;
use crate::types::TypeInfo;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;
use strum_macros::EnumDiscriminants;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Hash))]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SemanticEvent {
    TypeAdded(TypeInfo),
    NestedTypeAdded(TypeInfo),
    TypeRemoved {
        full_name: String,
    },
    TypeRenamed {
        old_full_name: String,
        ty: TypeInfo,
    },
    TypeReparented {
        old_full_name: String,
        ty: TypeInfo,
    },
    BaseTypeChanged {
        ty: TypeInfo,
        bases: Vec<String>,
    },
    FieldAdded(MemberInfo),
    PropertyAdded(MemberInfo),
    MethodAdded(MemberInfo),
    ParameterAdded(MemberInfo),
    AttributeAdded(MemberInfo),
    FieldRemoved(MemberInfo),
    PropertyRemoved(MemberInfo),
    MethodRemoved(MemberInfo),
    ParameterRemoved(MemberInfo),
    AttributeRemoved(MemberInfo),
    FieldRenamed {
        old_name: String,
        member: MemberInfo,
    },
    PropertyRenamed {
        old_name: String,
        member: MemberInfo,
    },
    MethodRenamed {
        old_signature: String,
        member: MemberInfo,
    },
    ParameterRenamed {
        method: MemberInfo,
        index: usize,
        old_name: String,
        param: MemberInfo,
    },
    AttributeChanged(MemberInfo),
    ElementPropertiesChanged(ElementInfo),
}

impl SemanticEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from(self)
    }

    /// `*Added` variant matching the member's kind.
    pub fn member_added(member: MemberInfo) -> Self {
        match member.kind {
            SymbolKind::Field => Self::FieldAdded(member),
            SymbolKind::Property => Self::PropertyAdded(member),
            SymbolKind::Method => Self::MethodAdded(member),
            SymbolKind::Parameter => Self::ParameterAdded(member),
            _ => Self::AttributeAdded(member),
        }
    }

    /// `*Removed` variant matching the member's kind.
    pub fn member_removed(member: MemberInfo) -> Self {
        match member.kind {
            SymbolKind::Field => Self::FieldRemoved(member),
            SymbolKind::Property => Self::PropertyRemoved(member),
            SymbolKind::Method => Self::MethodRemoved(member),
            SymbolKind::Parameter => Self::ParameterRemoved(member),
            _ => Self::AttributeRemoved(member),
        }
    }
}

type Listener = Box<dyn FnMut(&SemanticEvent)>;

struct ListenerSlot {
    id: u64,
    filter: Option<EventKind>,
    callback: Listener,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: Vec<ListenerSlot>,
    dispatching: bool,
    released: HashSet<u64>,
    queued: VecDeque<SemanticEvent>,
}

/// Owned, single-threaded event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Rc<RefCell<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to one kind of event.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl FnMut(&SemanticEvent) + 'static,
    ) -> Subscription {
        self.attach(Some(kind), Box::new(callback))
    }

    /// Listen to every event.
    pub fn subscribe_all(&self, callback: impl FnMut(&SemanticEvent) + 'static) -> Subscription {
        self.attach(None, Box::new(callback))
    }

    pub fn listener_count(&self) -> usize {
        let state = self.state.borrow();
        state
            .listeners
            .iter()
            .filter(|slot| !state.released.contains(&slot.id))
            .count()
    }

    /// Delivers `event` to every matching listener in subscription order.
    ///
    /// Publishing from inside a listener queues the event until the current
    /// dispatch finishes.
    pub fn publish(&self, event: SemanticEvent) {
        {
            let mut state = self.state.borrow_mut();
            state.queued.push_back(event);
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }

        loop {
            let (event, mut listeners) = {
                let mut state = self.state.borrow_mut();
                match state.queued.pop_front() {
                    Some(event) => (event, std::mem::take(&mut state.listeners)),
                    None => {
                        state.dispatching = false;
                        break;
                    }
                }
            };

            let kind = event.kind();
            for slot in listeners.iter_mut() {
                if self.state.borrow().released.contains(&slot.id) {
                    continue;
                }
                if slot.filter.is_none_or(|filter| filter == kind) {
                    (slot.callback)(&event);
                }
            }

            let mut state = self.state.borrow_mut();
            let added = std::mem::take(&mut state.listeners);
            listeners.extend(added);
            let released = std::mem::take(&mut state.released);
            listeners.retain(|slot| !released.contains(&slot.id));
            state.listeners = listeners;
        }
    }

    fn attach(&self, filter: Option<EventKind>, callback: Listener) -> Subscription {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.listeners.push(ListenerSlot {
            id,
            filter,
            callback,
        });
        Subscription {
            state: Rc::downgrade(&self.state),
            id,
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Guard for one listener. Dropping it detaches the listener, including
/// from inside a dispatch.
#[must_use = "dropping the subscription detaches the listener"]
pub struct Subscription {
    state: Weak<RefCell<BusState>>,
    id: u64,
}

impl Subscription {
    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = state.try_borrow_mut() else {
            return;
        };
        if state.dispatching {
            state.released.insert(self.id);
        } else {
            let id = self.id;
            state.listeners.retain(|slot| slot.id != id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn removed(name: &str) -> SemanticEvent {
        SemanticEvent::TypeRemoved {
            full_name: name.to_string(),
        }
    }

    #[test]
    fn test_kind_filtering() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = bus.subscribe(EventKind::TypeRemoved, move |event| {
            sink.borrow_mut().push(event.clone());
        });

        bus.publish(SemanticEvent::ElementPropertiesChanged(ElementInfo {
            kind: SymbolKind::Type,
            full_name: "Acme.Widget".to_string(),
        }));
        bus.publish(removed("Acme.Widget"));

        assert_eq!(*seen.borrow(), vec![removed("Acme.Widget")]);
    }

    #[test]
    fn test_dropping_subscription_detaches() {
        let bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let sub = bus.subscribe_all(move |_| *counter.borrow_mut() += 1);
        assert_eq!(bus.listener_count(), 1);

        bus.publish(removed("A.B"));
        drop(sub);
        bus.publish(removed("A.C"));

        assert_eq!(*count.borrow(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_release_inside_dispatch() {
        let bus = EventBus::new();
        let holder: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let count = Rc::new(RefCell::new(0));

        let inner_holder = Rc::clone(&holder);
        let counter = Rc::clone(&count);
        let sub = bus.subscribe_all(move |_| {
            *counter.borrow_mut() += 1;
            // one-shot listener
            inner_holder.borrow_mut().take();
        });
        *holder.borrow_mut() = Some(sub);

        bus.publish(removed("A.B"));
        bus.publish(removed("A.C"));
        assert_eq!(*count.borrow(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_publish_from_listener_is_queued() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let echo_bus = bus.clone();
        let _sub = bus.subscribe_all(move |event| {
            sink.borrow_mut().push(event.clone());
            if *event == removed("A.B") {
                echo_bus.publish(removed("A.C"));
            }
        });

        bus.publish(removed("A.B"));
        assert_eq!(*seen.borrow(), vec![removed("A.B"), removed("A.C")]);
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_string(&removed("Acme.Widget")).unwrap();
        assert_eq!(json, r#"{"event":"type_removed","full_name":"Acme.Widget"}"#);
        assert_eq!(removed("x").kind(), EventKind::TypeRemoved);
    }
}
