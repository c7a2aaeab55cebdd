//! `ElementChanged(Rename)`
//!
//! Hosts usually reissue handles for a renamed subtree, so the old entries
//! simply stop answering their probe. A rename is recovered by pairing
//! entries that failed the probe with live types that are not indexed under
//! their current name. Several renames reported for the same container are
//! resolved together: candidates are ranked by how many member signatures
//! they share with the renamed type, ties go to the first old name in
//! lexical order.

use super::Reconciler;
use super::walk::Liveness;
use super::walk::MemberRead;
use crate::error::MirrorResult;
use crate::events::SemanticEvent;
use crate::host::HostTree;
use crate::index::IndexedType;
use crate::index::is_stale;
use crate::members::MemberRecord;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use crate::types::TypeInfo;
use crate::types::root_segment;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::debug;
use tracing::trace;

/// A live type that is not indexed under its current name, with its
/// nested types. The arrival's own entry comes first.
struct Arrival {
    handle: NodeHandle,
    entries: Vec<IndexedType>,
}

struct Pairing {
    old_name: String,
    arrival: Arrival,
    reparented: bool,
}

type LivenessMap = BTreeMap<String, Liveness>;

impl Reconciler {
    pub(super) fn on_renamed(&mut self, element: NodeHandle) -> MirrorResult<()> {
        match self.host.kind(element)? {
            SymbolKind::Namespace => self.rename_namespace(element),
            SymbolKind::Type => self.rename_type(element),
            kind => self.rename_member(element, kind),
        }
    }

    fn rename_type(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let new_name = self.host.full_name(element)?;
        if self
            .index
            .get(&new_name)
            .is_some_and(|entry| entry.fragments.contains(&element))
        {
            trace!(%new_name, "rename already reconciled");
            return Ok(());
        }
        if self.config.is_excluded(&new_name) {
            trace!(%new_name, "type renamed into an excluded namespace");
            return Ok(());
        }

        let liveness = self.probe_index();
        let arrivals = self.read_arrivals(element, &liveness)?;
        let top = self.top_level_of(element)?;
        let (pairings, unpaired) = self.pair_arrivals(arrivals, &liveness);

        for arrival in unpaired {
            debug!(%new_name, "renamed type has no stale counterpart, indexing it as new");
            for entry in arrival.entries {
                if let Some(info) = self.admit(entry, &liveness) {
                    self.emit_added(info);
                }
            }
        }
        self.apply_pairings(pairings, &liveness);
        self.monitor(root_segment(&new_name), top);
        Ok(())
    }

    /// The renamed element plus any sibling type that is live but not indexed
    /// under its name, the trace of another rename in the same batch.
    fn read_arrivals(
        &self,
        element: NodeHandle,
        liveness: &LivenessMap,
    ) -> MirrorResult<Vec<Arrival>> {
        let mut arrivals = vec![Arrival {
            handle: element,
            entries: self.read_subtree(element, true, false)?,
        }];
        let Some(parent) = self.host.parent(element)? else {
            return Ok(arrivals);
        };
        let mut seen = HashSet::new();
        seen.insert(self.host.full_name(element)?);
        for (kind, sibling) in self.host.children(parent)? {
            if kind != SymbolKind::Type || sibling == element {
                continue;
            }
            let name = self.host.full_name(sibling)?;
            if liveness.get(&name) == Some(&Liveness::Live) || !seen.insert(name) {
                continue;
            }
            let entries = self.read_subtree(sibling, true, false)?;
            if !entries.is_empty() {
                arrivals.push(Arrival {
                    handle: sibling,
                    entries,
                });
            }
        }
        Ok(arrivals)
    }

    /// Pairs arrivals with the entries they replace: a handle that survived
    /// the rename, else a stale sibling sharing members, else (for the
    /// renamed element only) a stale type of the same short name elsewhere,
    /// which is a move, else any stale sibling. Siblings left unpaired are
    /// not touched.
    fn pair_arrivals(
        &self,
        arrivals: Vec<Arrival>,
        liveness: &LivenessMap,
    ) -> (Vec<Pairing>, Vec<Arrival>) {
        let mut used: HashSet<String> = HashSet::new();
        let mut pairings = Vec::new();
        let mut unpaired = Vec::new();

        for (position, arrival) in arrivals.into_iter().enumerate() {
            let primary = position == 0;
            let Some(own) = arrival.entries.first() else {
                continue;
            };
            let kept = liveness.iter().find_map(|(name, state)| match state {
                Liveness::Moved { handle, .. }
                    if *handle == arrival.handle && !used.contains(name) =>
                {
                    Some(name.clone())
                }
                _ => None,
            });
            let same_container = |entry: &IndexedType| {
                entry.container == own.container && entry.nested == own.nested
            };
            let old_name = kept
                .or_else(|| self.best_stale(liveness, &used, own, true, same_container))
                .or_else(|| {
                    primary
                        .then(|| {
                            self.best_stale(liveness, &used, own, false, |entry| {
                                entry.short_name == own.short_name
                            })
                        })
                        .flatten()
                })
                .or_else(|| {
                    primary
                        .then(|| self.best_stale(liveness, &used, own, false, same_container))
                        .flatten()
                });

            match old_name {
                Some(old_name) => {
                    let reparented = self
                        .index
                        .get(&old_name)
                        .is_some_and(|old| old.container != own.container);
                    used.insert(old_name.clone());
                    pairings.push(Pairing {
                        old_name,
                        arrival,
                        reparented,
                    });
                }
                None if primary => unpaired.push(arrival),
                None => {}
            }
        }
        (pairings, unpaired)
    }

    /// Stale entry accepted by `filter` sharing the most member signatures
    /// with `own`; the first in name order wins a tie.
    fn best_stale(
        &self,
        liveness: &LivenessMap,
        used: &HashSet<String>,
        own: &IndexedType,
        require_overlap: bool,
        filter: impl Fn(&IndexedType) -> bool,
    ) -> Option<String> {
        let mut best: Option<(&str, usize)> = None;
        for (name, state) in liveness {
            if *state != Liveness::Stale || used.contains(name) {
                continue;
            }
            let Some(entry) = self.index.get(name) else {
                continue;
            };
            if !filter(entry) {
                continue;
            }
            let score = shared_signatures(&entry.members, &own.members);
            if require_overlap && score == 0 {
                continue;
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((name.as_str(), score));
            }
        }
        best.map(|(name, _)| name.to_string())
    }

    fn apply_pairings(&mut self, pairings: Vec<Pairing>, liveness: &LivenessMap) {
        // every paired entry leaves first, so swapped names do not collide
        let mut displaced: BTreeMap<String, IndexedType> = BTreeMap::new();
        for pairing in &pairings {
            self.displace(&pairing.old_name, true, liveness, &mut displaced);
        }

        for pairing in pairings {
            let Pairing {
                old_name,
                arrival,
                reparented,
            } = pairing;
            let Some(new_name) = arrival.entries.first().map(|e| e.full_name.clone()) else {
                continue;
            };
            for entry in arrival.entries {
                let old = rebase(&entry.full_name, &new_name, &old_name)
                    .filter(|name| displaced.remove(name).is_some());
                let Some(info) = self.admit(entry, liveness) else {
                    continue;
                };
                match old {
                    Some(old) if old == info.full_name => {
                        trace!(full_name = %old, "handles reissued under the same name");
                    }
                    Some(old) if reparented && info.full_name == new_name => {
                        self.emit(SemanticEvent::TypeReparented {
                            old_full_name: old,
                            ty: info,
                        });
                    }
                    Some(old) => self.emit(SemanticEvent::TypeRenamed {
                        old_full_name: old,
                        ty: info,
                    }),
                    None => self.emit_added(info),
                }
            }
            self.schedule_drop(&old_name);
        }

        for entry in displaced.into_values() {
            self.emit_removed(&entry);
        }
    }

    fn rename_namespace(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let new_ns = self.host.full_name(element)?;
        if self.config.is_excluded(&new_ns) {
            trace!(namespace = %new_ns, "namespace renamed into the exclusion list");
            return Ok(());
        }
        let liveness = self.probe_index();
        let entries = self.read_subtree(element, false, false)?;
        let top = self.top_level_of(element)?;
        let old_ns = pick_old_namespace(&new_ns, &entries, &liveness);

        match old_ns {
            Some(old_ns) => {
                debug!(from = %old_ns, to = %new_ns, "namespace renamed");
                let mut displaced = BTreeMap::new();
                self.displace(&old_ns, false, &liveness, &mut displaced);
                for entry in entries {
                    let old = rebase(&entry.full_name, &new_ns, &old_ns)
                        .filter(|name| displaced.remove(name).is_some());
                    let Some(info) = self.admit(entry, &liveness) else {
                        continue;
                    };
                    match old {
                        Some(old) => self.emit(SemanticEvent::TypeRenamed {
                            old_full_name: old,
                            ty: info,
                        }),
                        None => self.emit_added(info),
                    }
                }
                for entry in displaced.into_values() {
                    self.emit_removed(&entry);
                }
                self.schedule_drop(&old_ns);
            }
            None => {
                debug!(namespace = %new_ns, "renamed namespace held no indexed type");
                for entry in entries {
                    if let Some(info) = self.admit(entry, &liveness) {
                        self.emit_added(info);
                    }
                }
            }
        }

        if !new_ns.contains('.') {
            self.retire_roots(element, &new_ns);
        }
        self.monitor(root_segment(&new_ns), top);
        Ok(())
    }

    /// Takes `prefix` (when `include_prefix`) and every non-live type beneath
    /// it out of the index.
    fn displace(
        &mut self,
        prefix: &str,
        include_prefix: bool,
        liveness: &LivenessMap,
        displaced: &mut BTreeMap<String, IndexedType>,
    ) {
        let nested = self
            .index
            .names_within(prefix)
            .into_iter()
            .filter(|name| liveness.get(name) != Some(&Liveness::Live));
        let names: Vec<String> = include_prefix
            .then(|| prefix.to_string())
            .into_iter()
            .chain(nested)
            .collect();
        for name in names {
            if let Some(entry) = self.index.remove(&name) {
                displaced.insert(name, entry);
            }
        }
    }

    /// Registers `entry`, evicting a dead occupant of its name first.
    /// Returns `None` when a live type already holds the name.
    fn admit(&mut self, entry: IndexedType, liveness: &LivenessMap) -> Option<TypeInfo> {
        if self.index.contains(&entry.full_name)
            && liveness.get(&entry.full_name) != Some(&Liveness::Live)
            && let Some(occupant) = self.index.remove(&entry.full_name)
        {
            self.emit_removed(&occupant);
        }
        let info = entry.info();
        self.index.register(entry).then_some(info)
    }

    /// Releases top-level namespaces that were renamed away: the renamed
    /// handle itself, or any whose handle no longer answers.
    fn retire_roots(&mut self, element: NodeHandle, new_ns: &str) {
        let host = Rc::clone(&self.host);
        let retired: Vec<String> = self
            .monitored
            .iter()
            .filter(|(name, monitored)| {
                name.as_str() != new_ns
                    && (monitored.handle == element || is_stale(host.as_ref(), monitored.handle))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in retired {
            if let Some(monitored) = self.monitored.remove(&name) {
                self.release(&name, monitored);
            }
        }
    }

    fn rename_member(&mut self, element: NodeHandle, kind: SymbolKind) -> MirrorResult<()> {
        let Some(read) = self.read_member(element)? else {
            trace!(%element, "rename of member outside the index ignored");
            return Ok(());
        };
        let host = Rc::clone(&self.host);
        let Some(entry) = self.index.get(&read.owner) else {
            return Ok(());
        };
        let old = entry
            .member_by_handle(element)
            .cloned()
            .or_else(|| stale_counterpart(host.as_ref(), entry, &read, kind));

        let owner = read.owner.clone();
        let member = read.record.info(&owner);
        let event = match &old {
            None => Some(SemanticEvent::member_added(member)),
            Some(old) if old.name == read.record.name && old.signature == read.record.signature => {
                None
            }
            Some(old) => Some(match kind {
                SymbolKind::Field => SemanticEvent::FieldRenamed {
                    old_name: old.name.clone(),
                    member,
                },
                SymbolKind::Property => SemanticEvent::PropertyRenamed {
                    old_name: old.name.clone(),
                    member,
                },
                SymbolKind::Method => SemanticEvent::MethodRenamed {
                    old_signature: old.signature.clone(),
                    member,
                },
                SymbolKind::Parameter => SemanticEvent::ParameterRenamed {
                    method: read.family[0].info(&owner),
                    index: read.record.index,
                    old_name: old.name.clone(),
                    param: member,
                },
                _ => SemanticEvent::AttributeChanged(member),
            }),
        };

        let old_root = old.as_ref().map_or(read.root, |old| {
            if old.parent == old.fragment {
                old.handle
            } else {
                old.parent
            }
        });
        if let Some(entry) = self.index.get_mut(&owner) {
            entry.replace_family(old_root, read.family);
        }
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }
}

/// Maps `full_name` beneath `new_prefix` onto the same place under `old_prefix`.
fn rebase(full_name: &str, new_prefix: &str, old_prefix: &str) -> Option<String> {
    if full_name == new_prefix {
        return Some(old_prefix.to_string());
    }
    full_name
        .strip_prefix(new_prefix)
        .filter(|tail| tail.starts_with('.'))
        .map(|tail| format!("{old_prefix}{tail}"))
}

/// Old namespace at the same depth and under the same parent as `new_ns`
/// whose non-live types re-resolve under `new_ns` most often.
fn pick_old_namespace(
    new_ns: &str,
    entries: &[IndexedType],
    liveness: &LivenessMap,
) -> Option<String> {
    let depth = new_ns.split('.').count();
    let parent = new_ns.rsplit_once('.').map(|(parent, _)| parent);
    let tails: HashSet<&str> = entries
        .iter()
        .filter_map(|entry| entry.full_name.strip_prefix(new_ns))
        .collect();

    let mut scores: BTreeMap<String, usize> = BTreeMap::new();
    for (name, state) in liveness {
        if *state == Liveness::Live {
            continue;
        }
        let segments: Vec<&str> = name.split('.').collect();
        if segments.len() <= depth {
            continue;
        }
        let old_ns = segments[..depth].join(".");
        if old_ns == new_ns || old_ns.rsplit_once('.').map(|(parent, _)| parent) != parent {
            continue;
        }
        let hit = tails.contains(&name[old_ns.len()..]);
        *scores.entry(old_ns).or_default() += usize::from(hit);
    }

    let mut best: Option<(String, usize)> = None;
    for (old_ns, score) in scores {
        if score > 0 && best.as_ref().is_none_or(|(_, top)| score > *top) {
            best = Some((old_ns, score));
        }
    }
    best.map(|(old_ns, _)| old_ns)
}

fn shared_signatures(old: &[MemberRecord], new: &[MemberRecord]) -> usize {
    let new: HashSet<&str> = new
        .iter()
        .filter(|m| m.parent == m.fragment)
        .map(|m| m.signature.as_str())
        .collect();
    old.iter()
        .filter(|m| m.parent == m.fragment && new.contains(m.signature.as_str()))
        .count()
}

/// The snapshot record a reissued member replaced: same kind and parent,
/// handle no longer live. Parameters match by position, methods by their
/// parameter list, anything else takes the first candidate.
fn stale_counterpart(
    host: &dyn HostTree,
    entry: &IndexedType,
    read: &MemberRead,
    kind: SymbolKind,
) -> Option<MemberRecord> {
    let parent = if read.root == read.record.handle {
        read.fragment
    } else {
        read.root
    };
    let candidates: Vec<&MemberRecord> = entry
        .members
        .iter()
        .filter(|m| {
            m.kind == kind
                && m.parent == parent
                && m.handle != read.record.handle
                && is_stale(host, m.handle)
        })
        .collect();
    let preferred = match kind {
        SymbolKind::Parameter => candidates
            .iter()
            .find(|m| m.index == read.record.index)
            .copied(),
        SymbolKind::Method => candidates
            .iter()
            .find(|m| parameter_list(&m.signature) == parameter_list(&read.record.signature))
            .copied(),
        _ => None,
    };
    preferred.or_else(|| candidates.first().copied()).cloned()
}

fn parameter_list(signature: &str) -> &str {
    signature
        .find('(')
        .map_or(signature, |open| &signature[open..])
}
