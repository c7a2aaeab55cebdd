//! Reconciliation engine
//!
//! Turns raw host notifications into semantic events. Every notification is
//! handled in two phases: all host reads happen first, then the index is
//! mutated and events are queued. Events are published only once the whole
//! notification has been reconciled, so a host failure halfway through
//! leaves neither a half-updated index nor a partial event stream.

mod added;
mod changed;
mod deleted;
mod rename;
mod walk;

use crate::adapter::RawAction;
use crate::adapter::RawChange;
use crate::config::MirrorConfig;
use crate::error::HostError;
use crate::error::MirrorError;
use crate::error::MirrorResult;
use crate::events::EventBus;
use crate::events::SemanticEvent;
use crate::host::HostTree;
use crate::index::IdentityIndex;
use crate::index::IndexedType;
use crate::index::SweepReport;
use crate::index::is_stale;
use crate::members::MemberRecord;
use crate::node::SymbolNode;
use crate::types::MemberInfo;
use crate::types::NodeHandle;
use crate::types::SubscriptionToken;
use crate::types::SymbolKind;
use crate::types::TypeInfo;
use crate::types::root_segment;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

/// A top-level namespace the engine holds a native subscription for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredNamespace {
    pub handle: NodeHandle,
    pub token: SubscriptionToken,
}

pub struct Reconciler {
    host: Rc<dyn HostTree>,
    config: MirrorConfig,
    index: IdentityIndex,
    monitored: BTreeMap<String, MonitoredNamespace>,
    /// Top-level namespaces that lost a type during the current notification.
    pending_drops: BTreeSet<String>,
    /// Events of the current notification, published once it succeeds.
    outbox: Vec<SemanticEvent>,
    bus: EventBus,
    disposed: bool,
}

impl Reconciler {
    pub fn new(host: Rc<dyn HostTree>, config: MirrorConfig) -> Self {
        Self {
            host,
            config,
            index: IdentityIndex::new(),
            monitored: BTreeMap::new(),
            pending_drops: BTreeSet::new(),
            outbox: Vec::new(),
            bus: EventBus::new(),
            disposed: false,
        }
    }

    pub const fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub const fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub const fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Names of the top-level namespaces currently subscribed.
    pub fn monitored_namespaces(&self) -> impl Iterator<Item = &str> {
        self.monitored.keys().map(String::as_str)
    }

    pub fn is_monitored(&self, namespace: &str) -> bool {
        self.monitored.contains_key(namespace)
    }

    /// Indexes everything already present in the host tree without emitting
    /// events, and subscribes every non-excluded top-level namespace.
    /// Returns the number of newly indexed types.
    pub fn scan(&mut self) -> MirrorResult<usize> {
        self.ensure_live()?;
        let entries = self.read_subtree(NodeHandle::ROOT, false, true)?;
        let mut roots = Vec::new();
        for (kind, handle) in self.host.children(NodeHandle::ROOT)? {
            if kind != SymbolKind::Namespace {
                continue;
            }
            let name = self.host.full_name(handle)?;
            if !self.config.is_excluded(&name) {
                roots.push((name, handle));
            }
        }

        let mut added = 0;
        for entry in entries {
            if self.index.register(entry) {
                added += 1;
            }
        }
        for (name, handle) in roots {
            self.monitor(&name, handle);
        }
        info!(
            types = added,
            namespaces = self.monitored.len(),
            "initial scan complete"
        );
        Ok(added)
    }

    /// Reconciles one normalized notification. On error nothing is
    /// published and the index is left as it was before the call.
    pub fn process(&mut self, change: &RawChange) -> MirrorResult<()> {
        self.ensure_live()?;
        debug!(?change, "reconciling");
        let outcome = match change.action {
            RawAction::Added => self.on_added(change.element),
            RawAction::Deleted => self.on_deleted(change.element),
            RawAction::Changed(kind) => self.on_changed(change.element, kind),
        };
        if let Err(err) = outcome {
            self.outbox.clear();
            self.pending_drops.clear();
            return Err(err);
        }
        self.collect_stale();
        self.finish();
        Ok(())
    }

    /// Probes every indexed handle and removes what is no longer live,
    /// emitting the matching removal events.
    pub fn sweep(&mut self) -> SweepReport {
        if self.disposed {
            return SweepReport::default();
        }
        let report = self.collect_stale();
        self.finish();
        report
    }

    /// Drops all indices and releases every subscription. Idempotent.
    pub fn clear(&mut self) {
        for (name, monitored) in std::mem::take(&mut self.monitored) {
            self.release(&name, monitored);
        }
        self.index.clear();
        self.outbox.clear();
        self.pending_drops.clear();
        debug!("mirror cleared");
    }

    /// Clears and stops accepting notifications.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear();
        self.disposed = true;
        info!("mirror disposed");
    }

    /// The live view of the type indexed under `full_name`.
    pub fn lookup(&self, full_name: &str) -> Option<SymbolNode> {
        self.index
            .get(full_name)
            .and_then(|entry| entry.fragments.first())
            .map(|handle| self.node(*handle))
    }

    pub fn type_info(&self, full_name: &str) -> Option<TypeInfo> {
        self.index.get(full_name).map(IndexedType::info)
    }

    /// Every indexed type with this short name.
    pub fn lookup_by_short_name(&self, short_name: &str) -> Vec<SymbolNode> {
        self.index
            .lookup_by_short_name(short_name)
            .into_iter()
            .filter_map(|entry| entry.fragments.first())
            .map(|handle| self.node(*handle))
            .collect()
    }

    /// Lazily enumerates indexed types, skipping any whose handles have gone
    /// stale since the last notification. The index itself is not touched.
    pub fn all_known_types(&self) -> impl Iterator<Item = SymbolNode> + '_ {
        self.index.iter().filter_map(move |entry| {
            entry
                .fragments
                .iter()
                .find(|fragment| !is_stale(self.host.as_ref(), **fragment))
                .map(|fragment| self.node(*fragment))
        })
    }

    /// Snapshot of the members of `full_name`, in declaration order.
    pub fn members_of(&self, full_name: &str) -> Vec<MemberInfo> {
        self.index
            .get(full_name)
            .map(|entry| {
                entry
                    .members
                    .iter()
                    .map(|member| member.info(full_name))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lookup_member(&self, full_name: &str, signature: &str) -> Option<MemberInfo> {
        self.index.get(full_name).and_then(|entry| {
            entry
                .members
                .iter()
                .find(|member| member.signature == signature)
                .map(|member| member.info(full_name))
        })
    }

    fn node(&self, handle: NodeHandle) -> SymbolNode {
        SymbolNode::new(Rc::clone(&self.host), handle, SymbolKind::Type)
    }

    fn ensure_live(&self) -> MirrorResult<()> {
        if self.disposed {
            Err(MirrorError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit(&mut self, event: SemanticEvent) {
        trace!(?event, "queued");
        self.outbox.push(event);
    }

    fn emit_added(&mut self, info: TypeInfo) {
        if info.nested {
            self.emit(SemanticEvent::NestedTypeAdded(info));
        } else {
            self.emit(SemanticEvent::TypeAdded(info));
        }
    }

    /// Queues `TypeRemoved` and schedules the namespace cascade check.
    fn emit_removed(&mut self, entry: &IndexedType) {
        self.pending_drops.insert(entry.root_namespace().to_string());
        self.emit(SemanticEvent::TypeRemoved {
            full_name: entry.full_name.clone(),
        });
    }

    /// Queues removal events for members that left together. Parameters and
    /// attributes whose own member left too are implied by it.
    fn emit_members_removed(&mut self, owner: &str, gone: &[MemberRecord]) {
        for member in gone {
            if gone.iter().any(|other| other.handle == member.parent) {
                continue;
            }
            self.emit(SemanticEvent::member_removed(member.info(owner)));
        }
    }

    fn collect_stale(&mut self) -> SweepReport {
        let report = self.index.sweep(self.host.as_ref());
        for entry in &report.removed_types {
            debug!(full_name = %entry.full_name, "swept stale type");
            self.emit_removed(entry);
        }
        let mut by_owner: BTreeMap<&str, Vec<MemberRecord>> = BTreeMap::new();
        for (owner, member) in &report.removed_members {
            by_owner
                .entry(owner.as_str())
                .or_default()
                .push(member.clone());
        }
        for (owner, gone) in by_owner {
            self.emit_members_removed(owner, &gone);
        }
        report
    }

    /// Releases namespaces that no longer hold any type, then publishes the
    /// queued events in order.
    fn finish(&mut self) {
        for name in std::mem::take(&mut self.pending_drops) {
            if self.index.has_types_under(&name) {
                continue;
            }
            if let Some(monitored) = self.monitored.remove(&name) {
                self.release(&name, monitored);
            }
        }
        for event in std::mem::take(&mut self.outbox) {
            self.bus.publish(event);
        }
    }

    /// Subscribes the top-level namespace `name` unless it is already
    /// monitored or excluded. A refused subscription leaves it unmonitored.
    fn monitor(&mut self, name: &str, handle: NodeHandle) {
        if self.monitored.contains_key(name) || self.config.is_excluded(name) {
            return;
        }
        match self.host.subscribe(handle) {
            Ok(token) => {
                debug!(namespace = name, "monitoring namespace");
                self.monitored
                    .insert(name.to_string(), MonitoredNamespace { handle, token });
            }
            Err(err) => {
                let err = MirrorError::Subscription {
                    namespace: name.to_string(),
                    message: err.to_string(),
                };
                warn!(error = %err, "namespace left unmonitored");
            }
        }
    }

    fn release(&self, name: &str, monitored: MonitoredNamespace) {
        match self.host.unsubscribe(monitored.token) {
            Ok(()) => debug!(namespace = name, "stopped monitoring namespace"),
            Err(err) => warn!(namespace = name, error = %err, "failed to unsubscribe"),
        }
    }

    /// Schedules the cascade check for the top-level namespace of `full_name`.
    fn schedule_drop(&mut self, full_name: &str) {
        self.pending_drops.insert(root_segment(full_name).to_string());
    }
}

/// Kind and full name of an element that may already be gone. Hosts that
/// still answer for deleted handles win; otherwise the index snapshot does.
fn identity_or_snapshot(
    host: &dyn HostTree,
    index: &IdentityIndex,
    handle: NodeHandle,
) -> MirrorResult<Option<(SymbolKind, String)>> {
    let from_host = host
        .kind(handle)
        .and_then(|kind| host.full_name(handle).map(|name| (kind, name)));
    match from_host {
        Ok(identity) => Ok(Some(identity)),
        Err(HostError::Stale(_)) => {
            if let Some(entry) = index.find_by_fragment(handle) {
                return Ok(Some((SymbolKind::Type, entry.full_name.clone())));
            }
            Ok(index
                .find_member(handle)
                .map(|(_, member)| (member.kind, member.signature.clone())))
        }
        Err(err) => Err(err.into()),
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("types", &self.index.len())
            .field("monitored", &self.monitored)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}
