//! `ElementDeleted`

use super::Reconciler;
use super::identity_or_snapshot;
use crate::error::HostError;
use crate::error::MirrorResult;
use crate::events::SemanticEvent;
use crate::index::is_stale;
use crate::members::MemberRecord;
use crate::members::read_member_family;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;
use tracing::trace;

impl Reconciler {
    pub(super) fn on_deleted(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let Some((kind, full_name)) =
            identity_or_snapshot(self.host.as_ref(), &self.index, element)?
        else {
            debug!(%element, "deleted element unknown, leaving it to the sweep");
            return Ok(());
        };
        match kind {
            SymbolKind::Namespace => self.remove_namespace(element, &full_name),
            SymbolKind::Type => {
                let full_name = self
                    .index
                    .find_by_fragment(element)
                    .map_or(full_name, |entry| entry.full_name.clone());
                self.remove_type(element, &full_name);
                Ok(())
            }
            _ => self.remove_member(element),
        }
    }

    /// Drops every indexed type beneath `namespace`. A type also declared in
    /// another live block of the same namespace keeps the fragments found
    /// there and loses only the members of the deleted block.
    fn remove_namespace(&mut self, element: NodeHandle, namespace: &str) -> MirrorResult<()> {
        let mut declared: BTreeMap<String, Vec<NodeHandle>> = BTreeMap::new();
        for block in self.find_declarations(namespace, SymbolKind::Namespace)? {
            if block == element {
                continue;
            }
            for (full_name, fragments) in self.gather_types(block, false)? {
                declared.entry(full_name).or_default().extend(fragments);
            }
        }

        let names = self.index.names_within(namespace);
        debug!(
            namespace,
            types = names.len(),
            surviving = declared.len(),
            "namespace deleted"
        );
        for name in names {
            let live = declared.get(&name).filter(|live| {
                self.index
                    .get(&name)
                    .is_some_and(|entry| entry.fragments.iter().any(|f| live.contains(f)))
            });
            let Some(live) = live else {
                if let Some(entry) = self.index.remove(&name) {
                    self.emit_removed(&entry);
                }
                continue;
            };
            let mut gone = Vec::new();
            if let Some(entry) = self.index.get_mut(&name) {
                entry.fragments.retain(|fragment| live.contains(fragment));
                let (left, kept): (Vec<MemberRecord>, Vec<MemberRecord>) = entry
                    .members
                    .drain(..)
                    .partition(|member| !live.contains(&member.fragment));
                entry.members = kept;
                gone = left;
            }
            self.emit_members_removed(&name, &gone);
        }
        self.schedule_drop(namespace);
        Ok(())
    }

    fn remove_type(&mut self, element: NodeHandle, full_name: &str) {
        let host = Rc::clone(&self.host);
        let Some(entry) = self.index.get(full_name) else {
            trace!(full_name, "deleted type was not indexed");
            return;
        };
        let survives = entry
            .fragments
            .iter()
            .any(|fragment| *fragment != element && !is_stale(host.as_ref(), *fragment));

        if survives {
            // one partial declaration went away, the type itself stays
            let mut gone = Vec::new();
            if let Some(entry) = self.index.get_mut(full_name) {
                entry.fragments.retain(|fragment| *fragment != element);
                let (left, kept): (Vec<MemberRecord>, Vec<MemberRecord>) = entry
                    .members
                    .drain(..)
                    .partition(|member| member.fragment == element);
                entry.members = kept;
                gone = left;
            }
            debug!(full_name, members = gone.len(), "partial fragment deleted");
            self.emit_members_removed(full_name, &gone);
            return;
        }

        if let Some(entry) = self.index.remove(full_name) {
            self.emit_removed(&entry);
        }
        for nested in self.index.remove_within(full_name) {
            self.emit_removed(&nested);
        }
    }

    fn remove_member(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let host = Rc::clone(&self.host);
        let Some((owner, record)) = self
            .index
            .find_member(element)
            .map(|(entry, record)| (entry.full_name.clone(), record.clone()))
        else {
            trace!(%element, "deleted member was not indexed");
            return Ok(());
        };

        // parameters and attributes change their member's signature
        let refreshed = if record.parent == record.fragment {
            None
        } else {
            match host.short_name(record.parent) {
                Ok(_) => Some(read_member_family(
                    host.as_ref(),
                    record.fragment,
                    record.parent,
                )?),
                Err(HostError::Stale(_)) => None,
                Err(err) => return Err(err.into()),
            }
        };

        if let Some(entry) = self.index.get_mut(&owner) {
            match refreshed {
                Some(family) => entry.replace_family(record.parent, family),
                None => {
                    entry.take_family(element);
                }
            }
        }
        self.emit(SemanticEvent::member_removed(record.info(&owner)));
        Ok(())
    }
}
