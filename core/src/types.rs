//! Core types shared by the index, the engine and the event bus

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Opaque reference to one element of the host tree.
///
/// Handles are owned by the host. A handle may stop designating a valid
/// element at any time, which is only observable through a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle(pub u64);

impl NodeHandle {
    /// The invisible root of the host tree. Its children are the top-level namespaces.
    pub const ROOT: Self = Self(0);

    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token returned by the host for a native notification subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(pub u64);

/// Symbol kind classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Type,
    Field,
    Property,
    Method,
    Parameter,
    Attribute,
}

impl SymbolKind {
    /// Fields, properties, methods, parameters and attributes.
    pub const fn is_member(self) -> bool {
        matches!(
            self,
            Self::Field | Self::Property | Self::Method | Self::Parameter | Self::Attribute
        )
    }

    /// Namespaces and types can hold types.
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Namespace | Self::Type)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Type => "type",
            Self::Field => "field",
            Self::Property => "property",
            Self::Method => "method",
            Self::Parameter => "parameter",
            Self::Attribute => "attribute",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the host claims changed in an `ElementChanged` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Rename,
    BaseTypeChange,
    ArgumentChange,
    SignatureChange,
    TypeRefChange,
    Unknown,
}

/// Resolved, handle-free description of an indexed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub full_name: String,
    pub short_name: String,
    /// Full name of the enclosing namespace or type.
    pub container: String,
    /// True when the container is a type.
    pub nested: bool,
}

/// Resolved, handle-free description of a member of an indexed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    /// Full name of the owning type.
    pub owner: String,
    pub kind: SymbolKind,
    pub name: String,
    /// Stable identity within the owner. Methods use `name(T1, T2)` so that
    /// overloads stay distinct; parameters are prefixed with their method.
    pub signature: String,
}

/// Generic description used by the catch-all property change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementInfo {
    pub kind: SymbolKind,
    pub full_name: String,
}

/// Returns the last dotted segment of `full_name`.
pub fn short_name_of(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

/// Returns the first dotted segment of `full_name`, the top-level namespace.
pub fn root_segment(full_name: &str) -> &str {
    full_name.split('.').next().unwrap_or(full_name)
}

/// True when `full_name` equals `prefix` or lies beneath it.
pub fn is_within(full_name: &str, prefix: &str) -> bool {
    full_name == prefix
        || (full_name.len() > prefix.len()
            && full_name.starts_with(prefix)
            && full_name.as_bytes()[prefix.len()] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_helpers() {
        assert_eq!(short_name_of("Acme.Core.Widget"), "Widget");
        assert_eq!(short_name_of("Widget"), "Widget");
        assert_eq!(root_segment("Acme.Core.Widget"), "Acme");
        assert!(is_within("Acme.Core.Widget", "Acme.Core"));
        assert!(is_within("Acme.Core", "Acme.Core"));
        assert!(!is_within("Acme.Corex.Widget", "Acme.Core"));
        assert!(!is_within("Acme", "Acme.Core"));
    }

    #[test]
    fn test_member_kinds() {
        assert!(SymbolKind::Parameter.is_member());
        assert!(!SymbolKind::Type.is_member());
        assert!(SymbolKind::Type.is_container());
        assert_eq!(SymbolKind::Method.to_string(), "method");
    }
}
