//! Lazily materialized read-only view over one host element

use crate::error::HostError;
use crate::error::HostResult;
use crate::host::HostTree;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use std::fmt;
use std::rc::Rc;

/// View over one element of the host tree.
///
/// Nothing but the handle and kind is cached: names, parent and children are
/// read from the host on every call, so a view never outlives the truth.
#[derive(Clone)]
pub struct SymbolNode {
    host: Rc<dyn HostTree>,
    handle: NodeHandle,
    kind: SymbolKind,
}

impl SymbolNode {
    pub(crate) fn new(host: Rc<dyn HostTree>, handle: NodeHandle, kind: SymbolKind) -> Self {
        Self { host, handle, kind }
    }

    /// Materialize a view for `handle`, asking the host for its kind.
    pub fn resolve(host: Rc<dyn HostTree>, handle: NodeHandle) -> HostResult<Self> {
        let kind = host.kind(handle)?;
        Ok(Self::new(host, handle, kind))
    }

    pub const fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub const fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn short_name(&self) -> HostResult<String> {
        self.host.short_name(self.handle)
    }

    pub fn full_name(&self) -> HostResult<String> {
        self.host.full_name(self.handle)
    }

    /// Liveness probe. Returns the short name on success; a stale handle is
    /// an ordinary `Err`, never a panic.
    pub fn probe(&self) -> Result<String, HostError> {
        self.short_name()
    }

    pub fn is_live(&self) -> bool {
        self.probe().is_ok()
    }

    /// Enclosing element, computed from the host. The view never holds on
    /// to its parent.
    pub fn parent(&self) -> HostResult<Option<Self>> {
        match self.host.parent(self.handle)? {
            Some(handle) if !handle.is_root() => {
                Ok(Some(Self::resolve(Rc::clone(&self.host), handle)?))
            }
            _ => Ok(None),
        }
    }

    pub fn children(&self) -> HostResult<Vec<Self>> {
        Ok(self
            .host
            .children(self.handle)?
            .into_iter()
            .map(|(kind, handle)| Self::new(Rc::clone(&self.host), handle, kind))
            .collect())
    }
}

impl fmt::Debug for SymbolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolNode")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for SymbolNode {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.kind == other.kind
    }
}

impl Eq for SymbolNode {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTree;

    #[test]
    fn test_view_reads_through_to_host() {
        let tree = Rc::new(MemoryTree::new());
        let ns = tree.add_namespace(NodeHandle::ROOT, "Acme").unwrap();
        let ty = tree.add_type(ns, "Widget").unwrap();

        let node = SymbolNode::resolve(tree.clone(), ty).unwrap();
        assert_eq!(node.kind(), SymbolKind::Type);
        assert_eq!(node.full_name().unwrap(), "Acme.Widget");
        assert_eq!(node.parent().unwrap().unwrap().handle(), ns);

        let root = SymbolNode::resolve(tree.clone(), ns).unwrap();
        assert!(root.parent().unwrap().is_none());
        assert_eq!(root.children().unwrap(), vec![node.clone()]);

        tree.delete(ty).unwrap();
        assert!(!node.is_live());
        assert!(node.probe().unwrap_err().is_stale());
    }
}
