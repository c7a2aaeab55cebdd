//! Member snapshots and stable member signatures
//!
//! Members are not indexed by name. Each indexed type keeps a snapshot of
//! its members so that renames can report the old name and removals can
//! report a signature after the host handle is gone.

use crate::error::HostResult;
use crate::host::HostTree;
use crate::types::MemberInfo;
use crate::types::NodeHandle;
use crate::types::SymbolKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub handle: NodeHandle,
    pub kind: SymbolKind,
    pub name: String,
    pub signature: String,
    /// Type fragment the member was declared in.
    pub fragment: NodeHandle,
    /// Direct parent: the fragment, or the method/member an attribute or
    /// parameter belongs to.
    pub parent: NodeHandle,
    /// Position among the method's parameters.
    pub index: usize,
}

impl MemberRecord {
    pub fn info(&self, owner: &str) -> MemberInfo {
        MemberInfo {
            owner: owner.to_string(),
            kind: self.kind,
            name: self.name.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// `name(T1, T2)`. Overloads differ only here.
pub fn method_signature<S: AsRef<str>>(name: &str, param_types: &[S]) -> String {
    let params: Vec<&str> = param_types.iter().map(AsRef::as_ref).collect();
    format!("{name}({})", params.join(", "))
}

fn parameter_signature(method_signature: &str, index: usize, name: &str) -> String {
    format!("{method_signature}#{index}:{name}")
}

fn attribute_signature(target_signature: Option<&str>, name: &str) -> String {
    match target_signature {
        Some(target) => format!("{target}[{name}]"),
        None => format!("[{name}]"),
    }
}

/// Walks up from `handle` to the nearest enclosing type.
pub fn owning_type(host: &dyn HostTree, handle: NodeHandle) -> HostResult<Option<NodeHandle>> {
    let mut current = host.parent(handle)?;
    while let Some(node) = current {
        if host.kind(node)? == SymbolKind::Type {
            return Ok(Some(node));
        }
        current = host.parent(node)?;
    }
    Ok(None)
}

/// Reads every member declared directly in one type fragment, including
/// method parameters and attributes. Nested types are not members.
pub fn read_fragment_members(
    host: &dyn HostTree,
    fragment: NodeHandle,
) -> HostResult<Vec<MemberRecord>> {
    let mut out = Vec::new();
    for (kind, handle) in host.children(fragment)? {
        if kind.is_member() {
            out.extend(read_member_family(host, fragment, handle)?);
        }
    }
    Ok(out)
}

/// Parameters and attributes hanging off a member.
fn read_nested_members(
    host: &dyn HostTree,
    fragment: NodeHandle,
    member: NodeHandle,
    member_signature: &str,
) -> HostResult<Vec<MemberRecord>> {
    let mut out = Vec::new();
    let mut index = 0;
    for (kind, handle) in host.children(member)? {
        let name = host.short_name(handle)?;
        let (signature, position) = match kind {
            SymbolKind::Parameter => {
                let position = index;
                index += 1;
                (parameter_signature(member_signature, position, &name), position)
            }
            SymbolKind::Attribute => (attribute_signature(Some(member_signature), &name), 0),
            _ => continue,
        };
        out.push(MemberRecord {
            handle,
            kind,
            name,
            signature,
            fragment,
            parent: member,
            index: position,
        });
    }
    Ok(out)
}

fn read_method_signature(host: &dyn HostTree, method: NodeHandle, name: &str) -> HostResult<String> {
    let mut types = Vec::new();
    for (kind, handle) in host.children(method)? {
        if kind == SymbolKind::Parameter {
            types.push(host.type_name(handle)?.unwrap_or_else(|| "?".to_string()));
        }
    }
    Ok(method_signature(name, &types))
}

/// The member directly under `fragment` that `handle` belongs to: the
/// handle itself, or the method/member a parameter or attribute hangs off.
pub fn member_root(
    host: &dyn HostTree,
    fragment: NodeHandle,
    handle: NodeHandle,
) -> HostResult<NodeHandle> {
    match host.parent(handle)? {
        Some(parent) if parent != fragment && host.kind(parent)?.is_member() => Ok(parent),
        _ => Ok(handle),
    }
}

/// Reads one member declared directly in `fragment` together with its
/// parameters and attributes. The member's own record comes first.
pub fn read_member_family(
    host: &dyn HostTree,
    fragment: NodeHandle,
    member: NodeHandle,
) -> HostResult<Vec<MemberRecord>> {
    let kind = host.kind(member)?;
    let name = host.short_name(member)?;
    let signature = match kind {
        SymbolKind::Method => read_method_signature(host, member, &name)?,
        SymbolKind::Attribute => attribute_signature(None, &name),
        _ => name.clone(),
    };
    let mut family = vec![MemberRecord {
        handle: member,
        kind,
        name,
        signature: signature.clone(),
        fragment,
        parent: fragment,
        index: 0,
    }];
    family.extend(read_nested_members(host, fragment, member, &signature)?);
    Ok(family)
}
