//! Runs a [`Scenario`] against a mirror over an in-memory host.

use crate::error::CliError;
use crate::error::Result;
use crate::scenario::Scenario;
use crate::scenario::Step;
use serde::Serialize;
use serde_json::json;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use symsync_core::HostResult;
use symsync_core::MemoryTree;
use symsync_core::NodeHandle;
use symsync_core::RawEventAdapter;
use symsync_core::SemanticEvent;
use symsync_core::Subscription;
use tracing::debug;
use tracing::info;

/// One line of replay output.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    step: usize,
    #[serde(flatten)]
    event: &'a SemanticEvent,
}

pub struct Replay {
    tree: Rc<MemoryTree>,
    adapter: RawEventAdapter,
    events: Rc<RefCell<Vec<SemanticEvent>>>,
    _listener: Subscription,
}

impl Replay {
    /// Builds the seed tree and starts observing it.
    pub fn start(scenario: &Scenario) -> Result<Self> {
        let tree = Rc::new(MemoryTree::with_quirks(scenario.host.into()));
        for (index, step) in scenario.seed.iter().enumerate() {
            apply(&tree, step).map_err(|err| at_step(index, err))?;
        }
        tree.take_notifications();

        let adapter = symsync_core::observe(tree.clone(), scenario.mirror.clone())?;
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let listener = adapter
            .engine()
            .bus()
            .subscribe_all(move |event| sink.borrow_mut().push(event.clone()));
        info!(
            types = adapter.engine().index().len(),
            "scenario seed observed"
        );
        Ok(Self {
            tree,
            adapter,
            events,
            _listener: listener,
        })
    }

    /// Applies one step, routes the resulting notifications through the
    /// adapter and returns the events that were published.
    pub fn step(&mut self, index: usize, step: &Step) -> Result<Vec<SemanticEvent>> {
        match step {
            Step::Sweep => {
                self.adapter.engine_mut().sweep();
            }
            Step::Scan => {
                self.adapter.engine_mut().scan()?;
            }
            other => apply(&self.tree, other).map_err(|err| at_step(index, err))?,
        }
        let delivered = self.adapter.deliver_all(self.tree.take_notifications());
        debug!(step = index, delivered, "step replayed");
        Ok(std::mem::take(&mut *self.events.borrow_mut()))
    }

    pub const fn adapter(&self) -> &RawEventAdapter {
        &self.adapter
    }

    /// Indexed types with their member counts, and the monitored namespaces.
    pub fn summary(&self) -> serde_json::Value {
        let engine = self.adapter.engine();
        let types: Vec<serde_json::Value> = engine
            .index()
            .iter()
            .map(|entry| {
                json!({
                    "full_name": entry.full_name,
                    "fragments": entry.fragments().len(),
                    "members": entry.members().len(),
                })
            })
            .collect();
        let monitored: Vec<&str> = engine.monitored_namespaces().collect();
        json!({ "types": types, "monitored": monitored })
    }
}

/// Replays every step, writing each event as a JSON line. Returns the
/// number of events written.
pub fn run(scenario: &Scenario, out: &mut impl Write, summary: bool) -> Result<usize> {
    let mut replay = Replay::start(scenario)?;
    let mut written = 0;
    for (index, step) in scenario.steps.iter().enumerate() {
        for event in replay.step(index, step)? {
            let line = EventLine {
                step: index,
                event: &event,
            };
            writeln!(out, "{}", serde_json::to_string(&line)?)?;
            written += 1;
        }
    }
    if summary {
        writeln!(out, "{}", serde_json::to_string(&replay.summary())?)?;
    }
    Ok(written)
}

fn at_step(step: usize, err: CliError) -> CliError {
    match err {
        CliError::Mirror(symsync_core::MirrorError::Host(source)) => CliError::Step { step, source },
        other => other,
    }
}

fn resolve(tree: &MemoryTree, full_name: &str) -> Result<NodeHandle> {
    tree.find(full_name)
        .ok_or_else(|| CliError::UnknownTarget(full_name.to_string()))
}

/// Performs a tree mutation. Mirror-level steps are no-ops here.
fn apply(tree: &MemoryTree, step: &Step) -> Result<()> {
    let outcome: HostResult<()> = match step {
        Step::Namespace { parent, name } => {
            let parent = match parent {
                Some(parent) => resolve(tree, parent)?,
                None => NodeHandle::ROOT,
            };
            tree.add_namespace(parent, name).map(drop)
        }
        Step::Type { parent, name } => tree.add_type(resolve(tree, parent)?, name).map(drop),
        Step::Field { owner, name, ty } => {
            tree.add_field(resolve(tree, owner)?, name, ty).map(drop)
        }
        Step::Property { owner, name, ty } => {
            tree.add_property(resolve(tree, owner)?, name, ty).map(drop)
        }
        Step::Method {
            owner,
            name,
            params,
        } => {
            let params: Vec<(&str, &str)> = params
                .iter()
                .map(|(name, ty)| (name.as_str(), ty.as_str()))
                .collect();
            tree.add_method(resolve(tree, owner)?, name, &params)
                .map(drop)
        }
        Step::Parameter { method, name, ty } => {
            tree.add_parameter(resolve(tree, method)?, name, ty).map(drop)
        }
        Step::Attribute { target, name } => {
            tree.add_attribute(resolve(tree, target)?, name).map(drop)
        }
        Step::Rename { target, new_name } => {
            tree.rename(resolve(tree, target)?, new_name).map(drop)
        }
        Step::Move { target, new_parent } => {
            let target = resolve(tree, target)?;
            tree.move_to(target, resolve(tree, new_parent)?).map(drop)
        }
        Step::Delete { target } => tree.delete(resolve(tree, target)?),
        Step::Detach { target } => tree.detach(resolve(tree, target)?),
        Step::Bases { target, bases } => {
            let bases: Vec<&str> = bases.iter().map(String::as_str).collect();
            tree.set_bases(resolve(tree, target)?, &bases)
        }
        Step::Touch { target, change } => tree.touch(resolve(tree, target)?, *change),
        Step::Sweep | Step::Scan => Ok(()),
    };
    outcome.map_err(|err| CliError::Mirror(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use symsync_core::EventKind;

    const SEEDED: &str = r#"
[[seed]]
op = "namespace"
name = "Acme"

[[seed]]
op = "type"
parent = "Acme"
name = "Widget"

[[seed]]
op = "field"
owner = "Acme.Widget"
name = "size"
ty = "int"
"#;

    fn scenario(steps: &str) -> Scenario {
        Scenario::from_toml_str(&format!("{SEEDED}\n{steps}")).unwrap()
    }

    #[test]
    fn test_seed_is_indexed_silently() {
        let replay = Replay::start(&scenario("")).unwrap();
        let engine = replay.adapter().engine();
        assert_eq!(engine.index().len(), 1);
        assert!(engine.lookup_member("Acme.Widget", "size").is_some());
        assert!(engine.is_monitored("Acme"));
    }

    #[test]
    fn test_steps_produce_event_lines() {
        let scenario = scenario(
            r#"
[[step]]
op = "rename"
target = "Acme.Widget"
new_name = "Gadget"

[[step]]
op = "method"
owner = "Acme.Gadget"
name = "Spin"
params = [["speed", "double"]]
"#,
        );
        let mut out = Vec::new();
        let written = run(&scenario, &mut out, false).unwrap();
        assert_eq!(written, 2);

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines[0],
            json!({
                "step": 0,
                "event": "type_renamed",
                "old_full_name": "Acme.Widget",
                "ty": {
                    "full_name": "Acme.Gadget",
                    "short_name": "Gadget",
                    "container": "Acme",
                    "nested": false,
                },
            })
        );
        assert_eq!(lines[1]["event"], "method_added");
        assert_eq!(lines[1]["signature"], "Spin(double)");
    }

    #[test]
    fn test_sweep_step_reports_detached_type() {
        let mut replay = Replay::start(&scenario("")).unwrap();
        let detach = Step::Detach {
            target: "Acme.Widget".to_string(),
        };
        assert!(replay.step(0, &detach).unwrap().is_empty());
        let events = replay.step(1, &Step::Sweep).unwrap();
        assert_eq!(
            events.iter().map(SemanticEvent::kind).collect::<Vec<_>>(),
            vec![EventKind::TypeRemoved]
        );
        assert_eq!(replay.summary(), json!({ "types": [], "monitored": [] }));
    }

    #[test]
    fn test_unknown_target() {
        let mut replay = Replay::start(&scenario("")).unwrap();
        let step = Step::Delete {
            target: "Acme.Missing".to_string(),
        };
        assert!(matches!(
            replay.step(3, &step),
            Err(CliError::UnknownTarget(name)) if name == "Acme.Missing"
        ));
    }

    #[test]
    fn test_summary_line() {
        let mut out = Vec::new();
        run(&scenario(""), &mut out, true).unwrap();
        let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            summary,
            json!({
                "types": [{ "full_name": "Acme.Widget", "fragments": 1, "members": 1 }],
                "monitored": ["Acme"],
            })
        );
    }
}
