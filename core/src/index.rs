//! Identity index over the currently known types
//!
//! Two views of the same set: full name → type (unique) and short name →
//! full names (ambiguous). Both are repaired incrementally; only
//! [`IdentityIndex::clear`] rebuilds from nothing.

use crate::error::HostError;
use crate::host::HostTree;
use crate::members::MemberRecord;
use crate::types::NodeHandle;
use crate::types::TypeInfo;
use crate::types::is_within;
use crate::types::root_segment;
use multimap::MultiMap;
use std::collections::BTreeMap;
use tracing::trace;

/// One logical type, possibly backed by several partial fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedType {
    pub full_name: String,
    pub short_name: String,
    /// Full name of the enclosing namespace or type.
    pub container: String,
    pub nested: bool,
    pub(crate) fragments: Vec<NodeHandle>,
    /// Union of every fragment's members.
    pub(crate) members: Vec<MemberRecord>,
}

impl IndexedType {
    pub fn info(&self) -> TypeInfo {
        TypeInfo {
            full_name: self.full_name.clone(),
            short_name: self.short_name.clone(),
            container: self.container.clone(),
            nested: self.nested,
        }
    }

    pub fn fragments(&self) -> &[NodeHandle] {
        &self.fragments
    }

    pub fn members(&self) -> &[MemberRecord] {
        &self.members
    }

    pub fn root_namespace(&self) -> &str {
        root_segment(&self.full_name)
    }

    pub(crate) fn member_by_handle(&self, handle: NodeHandle) -> Option<&MemberRecord> {
        self.members.iter().find(|m| m.handle == handle)
    }

    /// Removes the member `root` together with its parameters and attributes.
    pub(crate) fn take_family(&mut self, root: NodeHandle) -> Vec<MemberRecord> {
        let (gone, kept): (Vec<MemberRecord>, Vec<MemberRecord>) = self
            .members
            .drain(..)
            .partition(|m| m.handle == root || m.parent == root);
        self.members = kept;
        gone
    }

    /// Puts `family` where the member `old_root` used to be, or at the end.
    /// Stale records of the family's own root are dropped too.
    pub(crate) fn replace_family(&mut self, old_root: NodeHandle, family: Vec<MemberRecord>) {
        if let Some(new_root) = family.first().map(|m| m.handle)
            && new_root != old_root
        {
            self.take_family(new_root);
        }
        // a family is contiguous, so removing it leaves `at` in place
        let at = self
            .members
            .iter()
            .position(|m| m.handle == old_root)
            .unwrap_or(self.members.len());
        self.take_family(old_root);
        let at = at.min(self.members.len());
        self.members.splice(at..at, family);
    }
}

/// What a liveness sweep took out of the index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_types: Vec<IndexedType>,
    /// Stale members of types that are still live, with their owner's full name.
    pub removed_members: Vec<(String, MemberRecord)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed_types.is_empty() && self.removed_members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct IdentityIndex {
    by_full_name: BTreeMap<String, IndexedType>,
    by_short_name: MultiMap<String, String>,
    short_entries: usize,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry` unless its full name is already indexed. Returns whether
    /// anything was added.
    pub fn register(&mut self, entry: IndexedType) -> bool {
        if self.by_full_name.contains_key(&entry.full_name) {
            return false;
        }
        let claimed = self
            .by_short_name
            .get_vec(&entry.short_name)
            .is_some_and(|names| names.contains(&entry.full_name));
        if !claimed {
            self.by_short_name
                .insert(entry.short_name.clone(), entry.full_name.clone());
            self.short_entries += 1;
        }
        trace!(full_name = %entry.full_name, "registered type");
        self.by_full_name.insert(entry.full_name.clone(), entry);
        self.check_invariants();
        true
    }

    pub fn get(&self, full_name: &str) -> Option<&IndexedType> {
        self.by_full_name.get(full_name)
    }

    pub(crate) fn get_mut(&mut self, full_name: &str) -> Option<&mut IndexedType> {
        self.by_full_name.get_mut(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.by_full_name.contains_key(full_name)
    }

    /// Every type with this short name. More than one result is normal.
    pub fn lookup_by_short_name(&self, short_name: &str) -> Vec<&IndexedType> {
        self.by_short_name
            .get_vec(short_name)
            .map(|names| names.iter().filter_map(|n| self.by_full_name.get(n)).collect())
            .unwrap_or_default()
    }

    /// No-op when absent.
    pub fn remove(&mut self, full_name: &str) -> Option<IndexedType> {
        let entry = self.by_full_name.remove(full_name)?;
        if let Some(names) = self.by_short_name.get_vec_mut(&entry.short_name) {
            let before = names.len();
            names.retain(|n| n != full_name);
            self.short_entries -= before - names.len();
            if names.is_empty() {
                self.by_short_name.remove(&entry.short_name);
            }
        }
        trace!(full_name, "removed type");
        self.check_invariants();
        Some(entry)
    }

    /// Removes every type strictly beneath `prefix`, in name order.
    pub fn remove_within(&mut self, prefix: &str) -> Vec<IndexedType> {
        let doomed: Vec<String> = self
            .by_full_name
            .keys()
            .filter(|name| name.as_str() != prefix && is_within(name, prefix))
            .cloned()
            .collect();
        doomed.iter().filter_map(|name| self.remove(name)).collect()
    }

    /// Full names strictly beneath `prefix`, in name order.
    pub fn names_within(&self, prefix: &str) -> Vec<String> {
        self.by_full_name
            .keys()
            .filter(|name| name.as_str() != prefix && is_within(name, prefix))
            .cloned()
            .collect()
    }

    /// Type owning the fragment `handle`.
    pub fn find_by_fragment(&self, handle: NodeHandle) -> Option<&IndexedType> {
        self.by_full_name
            .values()
            .find(|entry| entry.fragments.contains(&handle))
    }

    /// Type and snapshot of the member `handle`.
    pub fn find_member(&self, handle: NodeHandle) -> Option<(&IndexedType, &MemberRecord)> {
        self.by_full_name
            .values()
            .find_map(|entry| entry.member_by_handle(handle).map(|m| (entry, m)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedType> {
        self.by_full_name.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_full_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_full_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_full_name.is_empty()
    }

    /// True while any indexed type lives under the top-level namespace `root`.
    pub fn has_types_under(&self, root: &str) -> bool {
        self.by_full_name
            .values()
            .any(|entry| entry.root_namespace() == root)
    }

    pub fn clear(&mut self) {
        self.by_full_name.clear();
        self.by_short_name.clear();
        self.short_entries = 0;
    }

    /// Probes every fragment and member handle. Types whose fragments all
    /// fail are removed; dead fragments and members of live types are pruned.
    /// Host failures other than staleness leave the entry untouched.
    pub fn sweep(&mut self, host: &dyn HostTree) -> SweepReport {
        let mut report = SweepReport::default();
        let names: Vec<String> = self.by_full_name.keys().cloned().collect();

        for name in names {
            let Some(entry) = self.by_full_name.get_mut(&name) else {
                continue;
            };
            let dead: Vec<NodeHandle> = entry
                .fragments
                .iter()
                .copied()
                .filter(|fragment| is_stale(host, *fragment))
                .collect();

            if dead.len() == entry.fragments.len() {
                if let Some(removed) = self.remove(&name) {
                    report.removed_types.push(removed);
                }
                continue;
            }

            entry.fragments.retain(|f| !dead.contains(f));
            let (gone, kept): (Vec<MemberRecord>, Vec<MemberRecord>) = entry
                .members
                .drain(..)
                .partition(|m| dead.contains(&m.fragment) || is_stale(host, m.handle));
            entry.members = kept;
            report
                .removed_members
                .extend(gone.into_iter().map(|m| (name.clone(), m)));
        }
        report
    }

    /// Full consistency check between both maps.
    pub fn verify(&self) -> bool {
        let pairs_resolve = self.by_short_name.iter_all().all(|(short, fulls)| {
            fulls.iter().all(|full| {
                self.by_full_name
                    .get(full)
                    .is_some_and(|entry| &entry.short_name == short)
            })
        });
        pairs_resolve && self.by_full_name.len() <= self.short_entries
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.by_full_name.len() <= self.short_entries,
            "full-name entries ({}) exceed short-name entries ({})",
            self.by_full_name.len(),
            self.short_entries
        );
    }
}

/// Liveness probe. Only a stale answer counts as dead.
pub(crate) fn is_stale(host: &dyn HostTree, handle: NodeHandle) -> bool {
    match host.short_name(handle) {
        Ok(_) => false,
        Err(HostError::Stale(_)) => true,
        Err(err) => {
            trace!(%handle, error = %err, "probe failed for another reason, keeping entry");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTree;
    use pretty_assertions::assert_eq;

    fn entry(full_name: &str, fragments: Vec<NodeHandle>) -> IndexedType {
        let (container, short) = full_name.rsplit_once('.').unwrap_or(("", full_name));
        IndexedType {
            full_name: full_name.to_string(),
            short_name: short.to_string(),
            container: container.to_string(),
            nested: false,
            fragments,
            members: Vec::new(),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut index = IdentityIndex::new();
        assert!(index.register(entry("Acme.Widget", vec![NodeHandle(1)])));
        assert!(!index.register(entry("Acme.Widget", vec![NodeHandle(2)])));
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup_by_short_name("Widget").len(), 1);
        assert_eq!(index.get("Acme.Widget").unwrap().fragments(), &[NodeHandle(1)]);
        assert!(index.verify());
    }

    #[test]
    fn test_ambiguous_short_names() {
        let mut index = IdentityIndex::new();
        index.register(entry("NsA.Foo", vec![NodeHandle(1)]));
        index.register(entry("NsB.Foo", vec![NodeHandle(2)]));

        let mut found: Vec<&str> = index
            .lookup_by_short_name("Foo")
            .iter()
            .map(|e| e.full_name.as_str())
            .collect();
        found.sort_unstable();
        assert_eq!(found, vec!["NsA.Foo", "NsB.Foo"]);

        index.remove("NsA.Foo");
        assert_eq!(index.lookup_by_short_name("Foo").len(), 1);
        assert!(index.remove("NsA.Foo").is_none());
        assert!(index.verify());
    }

    #[test]
    fn test_remove_within_prefix() {
        let mut index = IdentityIndex::new();
        for name in ["Acme.A", "Acme.B", "Acme.Core.C", "Acmex.D"] {
            index.register(entry(name, vec![NodeHandle(1)]));
        }
        let removed: Vec<String> = index
            .remove_within("Acme")
            .into_iter()
            .map(|e| e.full_name)
            .collect();
        assert_eq!(removed, vec!["Acme.A", "Acme.B", "Acme.Core.C"]);
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["Acmex.D"]);
    }

    #[test]
    fn test_replace_family_keeps_declaration_order() {
        let tree = MemoryTree::new();
        let ns = tree.add_namespace(NodeHandle::ROOT, "Acme").unwrap();
        let ty = tree.add_type(ns, "Widget").unwrap();
        tree.add_field(ty, "a", "int").unwrap();
        let method = tree.add_method(ty, "M", &[("x", "int")]).unwrap();
        tree.add_field(ty, "z", "int").unwrap();

        let mut widget = entry("Acme.Widget", vec![ty]);
        widget.members = crate::members::read_fragment_members(&tree, ty).unwrap();
        tree.add_parameter(method, "y", "string").unwrap();
        let family = crate::members::read_member_family(&tree, ty, method).unwrap();
        widget.replace_family(method, family);

        let signatures: Vec<&str> = widget.members().iter().map(|m| m.signature.as_str()).collect();
        assert_eq!(
            signatures,
            vec!["a", "M(int, string)", "M(int, string)#0:x", "M(int, string)#1:y", "z"]
        );
        assert_eq!(widget.take_family(method).len(), 3);
        assert_eq!(widget.members().len(), 2);
    }

    #[test]
    fn test_sweep_drops_types_with_no_live_fragment() {
        let tree = MemoryTree::new();
        let ns = tree.add_namespace(NodeHandle::ROOT, "Acme").unwrap();
        let first = tree.add_type(ns, "Widget").unwrap();
        let second = tree.add_type(ns, "Widget").unwrap();
        let gone = tree.add_type(ns, "Gone").unwrap();

        let mut index = IdentityIndex::new();
        index.register(entry("Acme.Widget", vec![first, second]));
        index.register(entry("Acme.Gone", vec![gone]));

        tree.detach(second).unwrap();
        tree.detach(gone).unwrap();
        let report = index.sweep(&tree);

        assert_eq!(report.removed_types.len(), 1);
        assert_eq!(report.removed_types[0].full_name, "Acme.Gone");
        assert_eq!(index.get("Acme.Widget").unwrap().fragments(), &[first]);
        assert!(index.sweep(&tree).is_empty());
    }
}
