//! Read-phase helpers: tree walks, fragment discovery and liveness probes

use super::Reconciler;
use crate::error::HostError;
use crate::error::MirrorResult;
use crate::index::IndexedType;
use crate::members::MemberRecord;
use crate::members::member_root;
use crate::members::owning_type;
use crate::members::read_fragment_members;
use crate::members::read_member_family;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use crate::types::is_within;
use std::collections::BTreeMap;
use std::collections::HashMap;

/// What the host says about an indexed type right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Liveness {
    /// At least one fragment is live under the indexed name.
    Live,
    /// A fragment handle survived but now answers to another name.
    Moved {
        handle: NodeHandle,
        full_name: String,
    },
    Stale,
}

/// A member as the host reports it now, with the family it belongs to.
#[derive(Debug, Clone)]
pub(super) struct MemberRead {
    /// Full name of the owning type.
    pub owner: String,
    pub fragment: NodeHandle,
    /// The member directly under the fragment.
    pub root: NodeHandle,
    pub family: Vec<MemberRecord>,
    pub record: MemberRecord,
}

impl Reconciler {
    /// Reads a member whose owning type is indexed. `None` when the member is
    /// outside any type or its owner is not indexed.
    pub(super) fn read_member(&self, element: NodeHandle) -> MirrorResult<Option<MemberRead>> {
        let host = self.host.as_ref();
        let Some(fragment) = owning_type(host, element)? else {
            return Ok(None);
        };
        let owner = host.full_name(fragment)?;
        if !self.index.contains(&owner) {
            return Ok(None);
        }
        let root = member_root(host, fragment, element)?;
        let family = read_member_family(host, fragment, root)?;
        let Some(record) = family.iter().find(|m| m.handle == element).cloned() else {
            return Ok(None);
        };
        Ok(Some(MemberRead {
            owner,
            fragment,
            root,
            family,
            record,
        }))
    }

    /// Resolves every type at or beneath `start` into complete index entries,
    /// parents before nested types. Unless `whole_tree` is set, partial
    /// fragments declared outside `start` are looked up as well.
    pub(super) fn read_subtree(
        &self,
        start: NodeHandle,
        include_self: bool,
        whole_tree: bool,
    ) -> MirrorResult<Vec<IndexedType>> {
        let mut entries = Vec::new();
        for (full_name, mut fragments) in self.gather_types(start, include_self)? {
            if !whole_tree {
                for fragment in self.collect_fragments(&full_name)? {
                    if !fragments.contains(&fragment) {
                        fragments.push(fragment);
                    }
                }
            }
            entries.push(self.build_entry(full_name, fragments)?);
        }
        Ok(entries)
    }

    /// Type handles at or beneath `start`, grouped by full name in tree order.
    /// Excluded namespaces are not entered.
    pub(super) fn gather_types(
        &self,
        start: NodeHandle,
        include_self: bool,
    ) -> MirrorResult<Vec<(String, Vec<NodeHandle>)>> {
        let mut groups: Vec<(String, Vec<NodeHandle>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut stack = if include_self {
            vec![(SymbolKind::Type, start)]
        } else {
            self.children_rev(start)?
        };

        while let Some((kind, handle)) = stack.pop() {
            if !kind.is_container() {
                continue;
            }
            let full_name = self.host.full_name(handle)?;
            if self.config.is_excluded(&full_name) {
                continue;
            }
            if kind == SymbolKind::Type {
                match positions.get(&full_name) {
                    Some(position) => groups[*position].1.push(handle),
                    None => {
                        positions.insert(full_name.clone(), groups.len());
                        groups.push((full_name, vec![handle]));
                    }
                }
            }
            stack.extend(self.children_rev(handle)?);
        }
        Ok(groups)
    }

    /// Every live fragment declaring `full_name`.
    pub(super) fn collect_fragments(&self, full_name: &str) -> MirrorResult<Vec<NodeHandle>> {
        self.find_declarations(full_name, SymbolKind::Type)
    }

    /// Every live `kind` container named `full_name`, found by descending
    /// only through its enclosing namespaces and types.
    pub(super) fn find_declarations(
        &self,
        full_name: &str,
        wanted: SymbolKind,
    ) -> MirrorResult<Vec<NodeHandle>> {
        let mut found = Vec::new();
        let mut stack = self.children_rev(NodeHandle::ROOT)?;
        while let Some((kind, handle)) = stack.pop() {
            if !kind.is_container() {
                continue;
            }
            let name = self.host.full_name(handle)?;
            if kind == wanted && name == full_name {
                found.push(handle);
            } else if name != full_name && is_within(full_name, &name) {
                stack.extend(self.children_rev(handle)?);
            }
        }
        Ok(found)
    }

    /// Reads names, container and the member snapshot of one logical type.
    pub(super) fn build_entry(
        &self,
        full_name: String,
        fragments: Vec<NodeHandle>,
    ) -> MirrorResult<IndexedType> {
        let Some(first) = fragments.first().copied() else {
            return Err(HostError::failure("resolve", format!("{full_name} has no fragment")).into());
        };
        let short_name = self.host.short_name(first)?;
        let (container, nested) = self.container_of(first)?;
        let mut members = Vec::new();
        for fragment in &fragments {
            members.extend(read_fragment_members(self.host.as_ref(), *fragment)?);
        }
        Ok(IndexedType {
            full_name,
            short_name,
            container,
            nested,
            fragments,
            members,
        })
    }

    /// The top-level namespace enclosing `handle`, or `handle` itself.
    pub(super) fn top_level_of(&self, handle: NodeHandle) -> MirrorResult<NodeHandle> {
        let mut current = handle;
        while let Some(parent) = self.host.parent(current)? {
            current = parent;
        }
        Ok(current)
    }

    /// Full name of the element enclosing `handle`, empty at the top level.
    pub(super) fn container_of(&self, handle: NodeHandle) -> MirrorResult<(String, bool)> {
        match self.host.parent(handle)? {
            Some(parent) => Ok((
                self.host.full_name(parent)?,
                self.host.kind(parent)? == SymbolKind::Type,
            )),
            None => Ok((String::new(), false)),
        }
    }

    /// Probes every indexed type. Host failures other than staleness count
    /// as live so that nothing is paired or dropped on a guess.
    pub(super) fn probe_index(&self) -> BTreeMap<String, Liveness> {
        let host = self.host.as_ref();
        self.index
            .iter()
            .map(|entry| {
                let mut moved = None;
                let mut live = false;
                for fragment in &entry.fragments {
                    match host.short_name(*fragment) {
                        Ok(_) => match host.full_name(*fragment) {
                            Ok(name) if name == entry.full_name => live = true,
                            Ok(name) => {
                                moved.get_or_insert(Liveness::Moved {
                                    handle: *fragment,
                                    full_name: name,
                                });
                            }
                            Err(_) => live = true,
                        },
                        Err(HostError::Stale(_)) => {}
                        Err(_) => live = true,
                    }
                }
                let liveness = if live {
                    Liveness::Live
                } else {
                    moved.unwrap_or(Liveness::Stale)
                };
                (entry.full_name.clone(), liveness)
            })
            .collect()
    }

    /// Children of `handle`, reversed for stack-based preorder walks.
    fn children_rev(&self, handle: NodeHandle) -> MirrorResult<Vec<(SymbolKind, NodeHandle)>> {
        let mut children = self.host.children(handle)?;
        children.reverse();
        Ok(children)
    }
}
