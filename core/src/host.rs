//! Capability interface over the externally owned symbol tree

use crate::error::HostResult;
use crate::types::NodeHandle;
use crate::types::SubscriptionToken;
use crate::types::SymbolKind;

/// Read access to the live host tree plus its native subscription hooks.
///
/// Every read is fallible. `HostError::Stale` means the handle is no longer
/// valid; any other error is an unrelated host failure.
pub trait HostTree {
    /// Ordered children of `node`. `NodeHandle::ROOT` yields the top-level namespaces.
    fn children(&self, node: NodeHandle) -> HostResult<Vec<(SymbolKind, NodeHandle)>>;

    /// Unqualified name. This is the liveness probe.
    fn short_name(&self, node: NodeHandle) -> HostResult<String>;

    /// Dotted, fully qualified name. Some hosts keep answering this for a
    /// short while after the element was removed.
    fn full_name(&self, node: NodeHandle) -> HostResult<String>;

    fn kind(&self, node: NodeHandle) -> HostResult<SymbolKind>;

    /// Enclosing element, `None` for top-level namespaces.
    fn parent(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>>;

    /// Declared type of a field, property, parameter or method return.
    fn type_name(&self, node: NodeHandle) -> HostResult<Option<String>>;

    /// Base types currently declared on a type. Entries may be empty while
    /// the user is still typing.
    fn base_types(&self, node: NodeHandle) -> HostResult<Vec<String>>;

    fn subscribe(&self, namespace: NodeHandle) -> HostResult<SubscriptionToken>;

    fn unsubscribe(&self, token: SubscriptionToken) -> HostResult<()>;
}
