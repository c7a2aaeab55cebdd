//! In-memory host tree
//!
//! `MemoryTree` implements [`HostTree`] over a plain arena and mimics the
//! behaviour of real code-model hosts: renames reissue handles for the whole
//! subtree, deleted handles may keep answering identity queries, and
//! notifications are only produced for subscribed top-level namespaces.
//! Mutations queue raw notifications in an outbox that the caller drains
//! into a [`RawEventAdapter`](crate::adapter::RawEventAdapter).

use crate::adapter::RawAction;
use crate::adapter::RawChange;
use crate::error::HostError;
use crate::error::HostResult;
use crate::host::HostTree;
use crate::types::ChangeKind;
use crate::types::NodeHandle;
use crate::types::SubscriptionToken;
use crate::types::SymbolKind;
use crate::types::root_segment;
use crate::types::short_name_of;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

/// Host behaviours that differ between real implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostQuirks {
    /// Fire every notification twice in a row.
    pub double_fire: bool,
    /// Deleted handles keep answering `kind` and `full_name`.
    pub identity_after_delete: bool,
    /// Renames invalidate the handles of the renamed subtree.
    pub reissue_on_rename: bool,
    /// Deleted handles keep answering every identity query, `short_name`
    /// included, so liveness probes still report them as live.
    pub lingering_handles: bool,
}

impl Default for HostQuirks {
    fn default() -> Self {
        Self {
            double_fire: false,
            identity_after_delete: true,
            reissue_on_rename: true,
            lingering_handles: false,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: SymbolKind,
    name: String,
    parent: NodeHandle,
    children: Vec<NodeHandle>,
    type_name: Option<String>,
    bases: Vec<String>,
}

#[derive(Debug, Clone)]
struct Tombstone {
    kind: SymbolKind,
    full_name: String,
}

#[derive(Debug)]
struct TreeState {
    next_handle: u64,
    next_token: u64,
    nodes: HashMap<NodeHandle, NodeData>,
    tombstones: HashMap<NodeHandle, Tombstone>,
    roots: Vec<NodeHandle>,
    subscriptions: BTreeMap<SubscriptionToken, String>,
    outbox: VecDeque<RawChange>,
    failing: HashSet<NodeHandle>,
    quirks: HostQuirks,
}

impl TreeState {
    fn allocate(&mut self) -> NodeHandle {
        self.next_handle += 1;
        NodeHandle(self.next_handle)
    }

    fn node(&self, handle: NodeHandle) -> HostResult<&NodeData> {
        if self.failing.contains(&handle) {
            return Err(HostError::failure("read", format!("{handle} is busy")));
        }
        self.nodes.get(&handle).ok_or(HostError::Stale(handle))
    }

    fn full_name(&self, handle: NodeHandle) -> HostResult<String> {
        let mut segments = Vec::new();
        let mut current = handle;
        while !current.is_root() {
            let data = self.node(current)?;
            segments.push(data.name.as_str());
            current = data.parent;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// Identity of a deleted handle, when the quirks let it linger.
    fn tombstone(&self, handle: NodeHandle, identity_query: bool) -> HostResult<&Tombstone> {
        let answers = self.quirks.lingering_handles
            || (identity_query && self.quirks.identity_after_delete);
        self.tombstones
            .get(&handle)
            .filter(|_| answers)
            .ok_or(HostError::Stale(handle))
    }

    fn children_of(&self, handle: NodeHandle) -> HostResult<&Vec<NodeHandle>> {
        if handle.is_root() {
            Ok(&self.roots)
        } else {
            Ok(&self.node(handle)?.children)
        }
    }

    fn children_of_mut(&mut self, handle: NodeHandle) -> HostResult<&mut Vec<NodeHandle>> {
        if handle.is_root() {
            Ok(&mut self.roots)
        } else {
            self.nodes
                .get_mut(&handle)
                .map(|data| &mut data.children)
                .ok_or(HostError::Stale(handle))
        }
    }

    fn subtree(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = vec![handle];
        let mut cursor = 0;
        while cursor < out.len() {
            if let Some(data) = self.nodes.get(&out[cursor]) {
                out.extend(data.children.iter().copied());
            }
            cursor += 1;
        }
        out
    }

    fn bury(&mut self, handle: NodeHandle) {
        for node in self.subtree(handle) {
            if let Ok(full_name) = self.full_name(node)
                && let Some(data) = self.nodes.get(&node)
            {
                let kind = data.kind;
                self.tombstones.insert(node, Tombstone { kind, full_name });
            }
        }
        for node in self.subtree(handle) {
            self.nodes.remove(&node);
        }
    }

    fn is_observed(&self, parent: NodeHandle, full_name: &str) -> bool {
        parent.is_root() || {
            let root = root_segment(full_name);
            self.subscriptions.values().any(|name| name == root)
        }
    }

    fn notify(&mut self, action: RawAction, parent: NodeHandle, element: NodeHandle, full_name: &str) {
        if !self.is_observed(parent, full_name) {
            return;
        }
        let change = RawChange::new(action, parent, element);
        self.outbox.push_back(change);
        if self.quirks.double_fire {
            self.outbox.push_back(change);
        }
    }
}

/// Arena-backed [`HostTree`] used by tests and scenario replay.
#[derive(Debug)]
pub struct MemoryTree {
    state: RefCell<TreeState>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::with_quirks(HostQuirks::default())
    }

    pub fn with_quirks(quirks: HostQuirks) -> Self {
        Self {
            state: RefCell::new(TreeState {
                next_handle: 0,
                next_token: 0,
                nodes: HashMap::new(),
                tombstones: HashMap::new(),
                roots: Vec::new(),
                subscriptions: BTreeMap::new(),
                outbox: VecDeque::new(),
                failing: HashSet::new(),
                quirks,
            }),
        }
    }

    pub fn set_quirks(&self, quirks: HostQuirks) {
        self.state.borrow_mut().quirks = quirks;
    }

    pub fn quirks(&self) -> HostQuirks {
        self.state.borrow().quirks
    }

    pub fn add_namespace(&self, parent: NodeHandle, name: &str) -> HostResult<NodeHandle> {
        if !parent.is_root() {
            self.expect_kind(parent, &[SymbolKind::Namespace])?;
        }
        self.insert(parent, SymbolKind::Namespace, name, None, true)
    }

    /// Adds a type, or another partial fragment when the name already exists.
    pub fn add_type(&self, parent: NodeHandle, name: &str) -> HostResult<NodeHandle> {
        self.expect_kind(parent, &[SymbolKind::Namespace, SymbolKind::Type])?;
        self.insert(parent, SymbolKind::Type, name, None, true)
    }

    pub fn add_field(&self, owner: NodeHandle, name: &str, ty: &str) -> HostResult<NodeHandle> {
        self.expect_kind(owner, &[SymbolKind::Type])?;
        self.insert(owner, SymbolKind::Field, name, Some(ty), true)
    }

    pub fn add_property(&self, owner: NodeHandle, name: &str, ty: &str) -> HostResult<NodeHandle> {
        self.expect_kind(owner, &[SymbolKind::Type])?;
        self.insert(owner, SymbolKind::Property, name, Some(ty), true)
    }

    /// Adds a method together with its parameters. Only the method itself
    /// is announced, the way editors report a pasted declaration.
    pub fn add_method(
        &self,
        owner: NodeHandle,
        name: &str,
        params: &[(&str, &str)],
    ) -> HostResult<NodeHandle> {
        self.expect_kind(owner, &[SymbolKind::Type])?;
        let method = self.insert(owner, SymbolKind::Method, name, Some("void"), false)?;
        for (param, ty) in params {
            self.insert(method, SymbolKind::Parameter, param, Some(ty), false)?;
        }
        let full_name = self.state.borrow().full_name(method)?;
        self.state
            .borrow_mut()
            .notify(RawAction::Added, owner, method, &full_name);
        Ok(method)
    }

    pub fn add_parameter(&self, method: NodeHandle, name: &str, ty: &str) -> HostResult<NodeHandle> {
        self.expect_kind(method, &[SymbolKind::Method])?;
        self.insert(method, SymbolKind::Parameter, name, Some(ty), true)
    }

    pub fn add_attribute(&self, target: NodeHandle, name: &str) -> HostResult<NodeHandle> {
        self.insert(target, SymbolKind::Attribute, name, None, true)
    }

    /// Renames `handle`. Returns the handle that now designates the element,
    /// which is a fresh one unless `reissue_on_rename` is off.
    pub fn rename(&self, handle: NodeHandle, new_name: &str) -> HostResult<NodeHandle> {
        let parent = self.state.borrow().node(handle)?.parent;
        self.relocate(handle, parent, new_name)
    }

    /// Moves a type (or namespace) under `new_parent`, reported by the host
    /// as a rename of the moved element.
    pub fn move_to(&self, handle: NodeHandle, new_parent: NodeHandle) -> HostResult<NodeHandle> {
        let name = self.state.borrow().node(handle)?.name.clone();
        self.relocate(handle, new_parent, &name)
    }

    /// Deletes the subtree and reports it.
    pub fn delete(&self, handle: NodeHandle) -> HostResult<()> {
        self.remove(handle, true)
    }

    /// Deletes the subtree without any notification.
    pub fn detach(&self, handle: NodeHandle) -> HostResult<()> {
        self.remove(handle, false)
    }

    pub fn set_bases(&self, handle: NodeHandle, bases: &[&str]) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let data = state
            .nodes
            .get_mut(&handle)
            .ok_or(HostError::Stale(handle))?;
        data.bases = bases.iter().map(|b| (*b).to_string()).collect();
        let parent = data.parent;
        let full_name = state.full_name(handle)?;
        state.notify(
            RawAction::Changed(ChangeKind::BaseTypeChange),
            parent,
            handle,
            &full_name,
        );
        Ok(())
    }

    pub fn set_type_name(&self, handle: NodeHandle, ty: &str) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let data = state
            .nodes
            .get_mut(&handle)
            .ok_or(HostError::Stale(handle))?;
        data.type_name = Some(ty.to_string());
        let parent = data.parent;
        let full_name = state.full_name(handle)?;
        state.notify(
            RawAction::Changed(ChangeKind::TypeRefChange),
            parent,
            handle,
            &full_name,
        );
        Ok(())
    }

    /// Reports a change of `kind` without altering the tree.
    pub fn touch(&self, handle: NodeHandle, kind: ChangeKind) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let parent = state.node(handle)?.parent;
        let full_name = state.full_name(handle)?;
        state.notify(RawAction::Changed(kind), parent, handle, &full_name);
        Ok(())
    }

    /// Makes every read of `handle` fail with a non-stale host error.
    pub fn fail_on(&self, handle: NodeHandle) {
        self.state.borrow_mut().failing.insert(handle);
    }

    pub fn recover(&self, handle: NodeHandle) {
        self.state.borrow_mut().failing.remove(&handle);
    }

    /// Drains queued notifications.
    pub fn take_notifications(&self) -> Vec<RawChange> {
        self.state.borrow_mut().outbox.drain(..).collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.borrow().subscriptions.len()
    }

    pub fn is_subscribed(&self, namespace: &str) -> bool {
        self.state
            .borrow()
            .subscriptions
            .values()
            .any(|name| name == namespace)
    }

    /// First live element whose full name is `full_name`, in tree order.
    pub fn find(&self, full_name: &str) -> Option<NodeHandle> {
        let state = self.state.borrow();
        let mut stack: Vec<NodeHandle> = state.roots.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            if state.full_name(handle).ok().as_deref() == Some(full_name) {
                return Some(handle);
            }
            if let Some(data) = state.nodes.get(&handle) {
                stack.extend(data.children.iter().rev().copied());
            }
        }
        None
    }

    fn expect_kind(&self, handle: NodeHandle, allowed: &[SymbolKind]) -> HostResult<()> {
        let kind = self.state.borrow().node(handle)?.kind;
        if allowed.contains(&kind) {
            Ok(())
        } else {
            Err(HostError::failure(
                "insert",
                format!("{handle} is a {kind}, cannot hold this element"),
            ))
        }
    }

    fn insert(
        &self,
        parent: NodeHandle,
        kind: SymbolKind,
        name: &str,
        type_name: Option<&str>,
        announce: bool,
    ) -> HostResult<NodeHandle> {
        let mut state = self.state.borrow_mut();
        let handle = state.allocate();
        state.children_of_mut(parent)?.push(handle);
        state.nodes.insert(
            handle,
            NodeData {
                kind,
                name: name.to_string(),
                parent,
                children: Vec::new(),
                type_name: type_name.map(str::to_string),
                bases: Vec::new(),
            },
        );
        if announce {
            let full_name = state.full_name(handle)?;
            state.notify(RawAction::Added, parent, handle, &full_name);
        }
        Ok(handle)
    }

    fn remove(&self, handle: NodeHandle, announce: bool) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let parent = state.node(handle)?.parent;
        let full_name = state.full_name(handle)?;
        state.children_of_mut(parent)?.retain(|child| *child != handle);
        state.bury(handle);
        if announce {
            state.notify(RawAction::Deleted, parent, handle, &full_name);
        }
        Ok(())
    }

    fn relocate(
        &self,
        handle: NodeHandle,
        new_parent: NodeHandle,
        new_name: &str,
    ) -> HostResult<NodeHandle> {
        let mut state = self.state.borrow_mut();
        let old_parent = state.node(handle)?.parent;
        if !new_parent.is_root() {
            state.node(new_parent)?;
        }

        let target = if state.quirks.reissue_on_rename {
            let reissued = Self::reissue(&mut state, handle)?;
            state.children_of_mut(old_parent)?.retain(|c| *c != handle);
            reissued
        } else {
            state.children_of_mut(old_parent)?.retain(|c| *c != handle);
            handle
        };

        state.children_of_mut(new_parent)?.push(target);
        if let Some(data) = state.nodes.get_mut(&target) {
            data.name = new_name.to_string();
            data.parent = new_parent;
        }

        let full_name = state.full_name(target)?;
        state.notify(
            RawAction::Changed(ChangeKind::Rename),
            new_parent,
            target,
            &full_name,
        );
        Ok(target)
    }

    /// Copies the subtree under fresh handles and buries the old ones.
    fn reissue(state: &mut TreeState, handle: NodeHandle) -> HostResult<NodeHandle> {
        let old = state.subtree(handle);
        let mut mapping = HashMap::new();
        for node in &old {
            let fresh = state.allocate();
            mapping.insert(*node, fresh);
        }
        let mut copies = Vec::with_capacity(old.len());
        for node in &old {
            let mut data = state.node(*node)?.clone();
            if let Some(parent) = mapping.get(&data.parent) {
                data.parent = *parent;
            }
            data.children = data
                .children
                .iter()
                .map(|child| mapping.get(child).copied().unwrap_or(*child))
                .collect();
            copies.push((mapping[node], data));
        }
        state.bury(handle);
        for (fresh, data) in copies {
            state.nodes.insert(fresh, data);
        }
        Ok(mapping[&handle])
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTree for MemoryTree {
    fn children(&self, node: NodeHandle) -> HostResult<Vec<(SymbolKind, NodeHandle)>> {
        let state = self.state.borrow();
        let children = state.children_of(node)?;
        children
            .iter()
            .map(|child| Ok((state.node(*child)?.kind, *child)))
            .collect()
    }

    fn short_name(&self, node: NodeHandle) -> HostResult<String> {
        let state = self.state.borrow();
        match state.node(node) {
            Ok(data) => Ok(data.name.clone()),
            Err(HostError::Stale(_)) => state
                .tombstone(node, false)
                .map(|t| short_name_of(&t.full_name).to_string()),
            Err(err) => Err(err),
        }
    }

    fn full_name(&self, node: NodeHandle) -> HostResult<String> {
        let state = self.state.borrow();
        match state.full_name(node) {
            Err(HostError::Stale(_)) => state.tombstone(node, true).map(|t| t.full_name.clone()),
            other => other,
        }
    }

    fn kind(&self, node: NodeHandle) -> HostResult<SymbolKind> {
        let state = self.state.borrow();
        match state.node(node) {
            Ok(data) => Ok(data.kind),
            Err(HostError::Stale(_)) => state.tombstone(node, true).map(|t| t.kind),
            Err(err) => Err(err),
        }
    }

    fn parent(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>> {
        let parent = self.state.borrow().node(node)?.parent;
        Ok((!parent.is_root()).then_some(parent))
    }

    fn type_name(&self, node: NodeHandle) -> HostResult<Option<String>> {
        Ok(self.state.borrow().node(node)?.type_name.clone())
    }

    fn base_types(&self, node: NodeHandle) -> HostResult<Vec<String>> {
        Ok(self.state.borrow().node(node)?.bases.clone())
    }

    fn subscribe(&self, namespace: NodeHandle) -> HostResult<SubscriptionToken> {
        let mut state = self.state.borrow_mut();
        let full_name = state.full_name(namespace)?;
        state.next_token += 1;
        let token = SubscriptionToken(state.next_token);
        state.subscriptions.insert(token, full_name);
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> HostResult<()> {
        self.state
            .borrow_mut()
            .subscriptions
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| HostError::failure("unsubscribe", "unknown subscription token"))
    }
}
