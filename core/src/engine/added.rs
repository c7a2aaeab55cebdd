//! `ElementAdded`

use super::Reconciler;
use crate::error::MirrorResult;
use crate::events::SemanticEvent;
use crate::index::IndexedType;
use crate::members::read_fragment_members;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use crate::types::root_segment;
use tracing::debug;
use tracing::trace;

impl Reconciler {
    pub(super) fn on_added(&mut self, element: NodeHandle) -> MirrorResult<()> {
        match self.host.kind(element)? {
            SymbolKind::Namespace => self.add_namespace(element),
            SymbolKind::Type => self.add_type(element),
            _ => self.add_member(element),
        }
    }

    /// Walks the new namespace and indexes every type not already known.
    pub(super) fn add_namespace(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let full_name = self.host.full_name(element)?;
        if self.config.is_excluded(&full_name) {
            trace!(namespace = %full_name, "excluded namespace ignored");
            return Ok(());
        }
        let entries = self.read_subtree(element, false, false)?;
        let top = self.top_level_of(element)?;

        self.register_new(entries);
        self.monitor(root_segment(&full_name), top);
        Ok(())
    }

    pub(super) fn add_type(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let full_name = self.host.full_name(element)?;
        if self.config.is_excluded(&full_name) {
            trace!(%full_name, "type in excluded namespace ignored");
            return Ok(());
        }

        if let Some(entry) = self.index.get(&full_name) {
            if entry.fragments.contains(&element) {
                trace!(%full_name, "type already indexed");
                return Ok(());
            }
            // another partial declaration of a known type
            let members = read_fragment_members(self.host.as_ref(), element)?;
            let nested = self.read_subtree(element, false, false)?;
            if let Some(entry) = self.index.get_mut(&full_name) {
                entry.fragments.push(element);
                entry.members.extend(members);
            }
            debug!(%full_name, "attached partial fragment");
            self.register_new(nested);
            return Ok(());
        }

        let entries = self.read_subtree(element, true, false)?;
        let top = self.top_level_of(element)?;
        self.register_new(entries);
        self.monitor(root_segment(&full_name), top);
        Ok(())
    }

    fn add_member(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let Some(read) = self.read_member(element)? else {
            trace!(%element, "member of unindexed type ignored");
            return Ok(());
        };
        let Some(entry) = self.index.get(&read.owner) else {
            return Ok(());
        };
        if entry.member_by_handle(element).is_some() {
            return Ok(());
        }

        if entry.fragments.contains(&read.fragment) {
            if let Some(entry) = self.index.get_mut(&read.owner) {
                entry.replace_family(read.root, read.family);
            }
        } else {
            // first member seen in a declaration the index did not know yet
            let members = read_fragment_members(self.host.as_ref(), read.fragment)?;
            if let Some(entry) = self.index.get_mut(&read.owner) {
                entry.fragments.push(read.fragment);
                entry.members.extend(members);
            }
        }
        self.emit(SemanticEvent::member_added(read.record.info(&read.owner)));
        Ok(())
    }

    /// Registers every entry that is not indexed yet and queues its
    /// `TypeAdded`/`NestedTypeAdded` event.
    pub(super) fn register_new(&mut self, entries: Vec<IndexedType>) {
        for entry in entries {
            let info = entry.info();
            if self.index.register(entry) {
                self.emit_added(info);
            }
        }
    }
}
