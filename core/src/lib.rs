//! symsync core - live mirror of an externally owned symbol tree
//!
//! The host (an editor's code model, a language server) owns a mutable tree
//! of namespaces, types and members and reports raw `Added`/`Changed`/
//! `Deleted` notifications. This crate keeps an identity index of the types
//! in that tree, reconciles every raw notification into the semantic change
//! it stands for, and publishes the result on an owned event bus.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod index;
pub mod members;
pub mod memory;
pub mod node;
pub mod types;

pub use adapter::Delivery;
pub use adapter::RawAction;
pub use adapter::RawChange;
pub use adapter::RawEventAdapter;
pub use config::MirrorConfig;
pub use engine::MonitoredNamespace;
pub use engine::Reconciler;
pub use error::HostError;
pub use error::HostResult;
pub use error::MirrorError;
pub use error::MirrorResult;
pub use events::EventBus;
pub use events::EventKind;
pub use events::SemanticEvent;
pub use events::Subscription;
pub use host::HostTree;
pub use index::IdentityIndex;
pub use index::IndexedType;
pub use index::SweepReport;
pub use memory::HostQuirks;
pub use memory::MemoryTree;
pub use node::SymbolNode;
pub use types::ChangeKind;
pub use types::ElementInfo;
pub use types::MemberInfo;
pub use types::NodeHandle;
pub use types::SymbolKind;
pub use types::TypeInfo;

use std::rc::Rc;

/// Builds a mirror over `host`: indexes what the tree already holds,
/// subscribes its top-level namespaces and returns the adapter the host's
/// callbacks should be routed to.
pub fn observe(host: Rc<dyn HostTree>, config: MirrorConfig) -> MirrorResult<RawEventAdapter> {
    config.validate()?;
    let mut engine = Reconciler::new(host, config);
    engine.scan()?;
    Ok(RawEventAdapter::new(engine))
}
