//! `ElementChanged` other than renames

use super::Reconciler;
use crate::error::MirrorResult;
use crate::events::SemanticEvent;
use crate::types::ChangeKind;
use crate::types::ElementInfo;
use crate::types::NodeHandle;
use crate::types::SymbolKind;
use tracing::trace;

impl Reconciler {
    pub(super) fn on_changed(&mut self, element: NodeHandle, kind: ChangeKind) -> MirrorResult<()> {
        match kind {
            ChangeKind::Rename => self.on_renamed(element),
            ChangeKind::BaseTypeChange => self.on_bases_changed(element),
            ChangeKind::ArgumentChange => self.on_arguments_changed(element),
            ChangeKind::SignatureChange | ChangeKind::TypeRefChange | ChangeKind::Unknown => {
                self.on_properties_changed(element)
            }
        }
    }

    /// Only reported once the type has at least one non-blank base; editors
    /// fire this while the base list is still being typed.
    fn on_bases_changed(&mut self, element: NodeHandle) -> MirrorResult<()> {
        if self.host.kind(element)? != SymbolKind::Type {
            return self.on_properties_changed(element);
        }
        let full_name = self.host.full_name(element)?;
        let Some(entry) = self.index.get(&full_name) else {
            trace!(%full_name, "base change on unindexed type ignored");
            return Ok(());
        };
        let ty = entry.info();
        let bases: Vec<String> = self
            .host
            .base_types(element)?
            .into_iter()
            .map(|base| base.trim().to_string())
            .filter(|base| !base.is_empty())
            .collect();
        if bases.is_empty() {
            trace!(%full_name, "no valid base type yet");
            return Ok(());
        }
        self.emit(SemanticEvent::BaseTypeChanged { ty, bases });
        Ok(())
    }

    fn on_arguments_changed(&mut self, element: NodeHandle) -> MirrorResult<()> {
        if self.host.kind(element)? != SymbolKind::Attribute {
            return self.on_properties_changed(element);
        }
        let Some(read) = self.read_member(element)? else {
            trace!(%element, "attribute of unindexed type ignored");
            return Ok(());
        };
        let info = read.record.info(&read.owner);
        if let Some(entry) = self.index.get_mut(&read.owner) {
            entry.replace_family(read.root, read.family);
        }
        self.emit(SemanticEvent::AttributeChanged(info));
        Ok(())
    }

    /// Catch-all for signature, type reference and unclassified changes.
    fn on_properties_changed(&mut self, element: NodeHandle) -> MirrorResult<()> {
        let kind = self.host.kind(element)?;
        let full_name = self.host.full_name(element)?;
        match kind {
            SymbolKind::Type => {
                if !self.index.contains(&full_name) {
                    trace!(%full_name, "change on unindexed type ignored");
                    return Ok(());
                }
            }
            SymbolKind::Namespace => {
                trace!(%full_name, "namespace property change ignored");
                return Ok(());
            }
            _ => {
                let Some(read) = self.read_member(element)? else {
                    trace!(%full_name, "change on member of unindexed type ignored");
                    return Ok(());
                };
                // signatures follow parameter types
                if let Some(entry) = self.index.get_mut(&read.owner) {
                    entry.replace_family(read.root, read.family);
                }
            }
        }
        self.emit(SemanticEvent::ElementPropertiesChanged(ElementInfo {
            kind,
            full_name,
        }));
        Ok(())
    }
}
