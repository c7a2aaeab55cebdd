//! Scenario files: a host tree to start from and the edits to replay on it.
//!
//! ```toml
//! [mirror]
//! excluded_namespaces = ["System"]
//!
//! [[seed]]
//! op = "namespace"
//! name = "Acme"
//!
//! [[step]]
//! op = "type"
//! parent = "Acme"
//! name = "Widget"
//! ```
//!
//! Elements are addressed by full name. `seed` steps build the tree before
//! the mirror observes it; `step` entries are replayed one at a time.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use symsync_core::ChangeKind;
use symsync_core::HostQuirks;
use symsync_core::MirrorConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default)]
    pub host: HostOptions,

    #[serde(default)]
    pub seed: Vec<Step>,

    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(text)?;
        scenario.mirror.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Behaviour of the simulated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostOptions {
    pub double_fire: bool,
    pub identity_after_delete: bool,
    pub reissue_on_rename: bool,
    pub lingering_handles: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        let quirks = HostQuirks::default();
        Self {
            double_fire: quirks.double_fire,
            identity_after_delete: quirks.identity_after_delete,
            reissue_on_rename: quirks.reissue_on_rename,
            lingering_handles: quirks.lingering_handles,
        }
    }
}

impl From<HostOptions> for HostQuirks {
    fn from(options: HostOptions) -> Self {
        Self {
            double_fire: options.double_fire,
            identity_after_delete: options.identity_after_delete,
            reissue_on_rename: options.reissue_on_rename,
            lingering_handles: options.lingering_handles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Namespace {
        /// Enclosing namespace; top level when absent.
        parent: Option<String>,
        name: String,
    },
    Type {
        parent: String,
        name: String,
    },
    Field {
        owner: String,
        name: String,
        ty: String,
    },
    Property {
        owner: String,
        name: String,
        ty: String,
    },
    Method {
        owner: String,
        name: String,
        /// `[name, type]` pairs.
        #[serde(default)]
        params: Vec<(String, String)>,
    },
    Parameter {
        method: String,
        name: String,
        ty: String,
    },
    Attribute {
        target: String,
        name: String,
    },
    Rename {
        target: String,
        new_name: String,
    },
    Move {
        target: String,
        new_parent: String,
    },
    /// Deletes with a notification.
    Delete {
        target: String,
    },
    /// Deletes silently; only a sweep notices.
    Detach {
        target: String,
    },
    Bases {
        target: String,
        bases: Vec<String>,
    },
    Touch {
        target: String,
        change: ChangeKind,
    },
    Sweep,
    Scan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_toml_str(
            r#"
[host]
reissue_on_rename = false

[[seed]]
op = "namespace"
name = "Acme"

[[step]]
op = "method"
owner = "Acme.Widget"
name = "Resize"
params = [["w", "int"], ["h", "int"]]

[[step]]
op = "touch"
target = "Acme.Widget"
change = "base_type_change"

[[step]]
op = "sweep"
"#,
        )
        .unwrap();

        assert!(!scenario.host.reissue_on_rename);
        assert!(scenario.host.identity_after_delete);
        assert!(!scenario.host.lingering_handles);
        assert_eq!(scenario.mirror, MirrorConfig::default());
        assert_eq!(
            scenario.seed,
            vec![Step::Namespace {
                parent: None,
                name: "Acme".to_string()
            }]
        );
        assert_eq!(
            scenario.steps,
            vec![
                Step::Method {
                    owner: "Acme.Widget".to_string(),
                    name: "Resize".to_string(),
                    params: vec![
                        ("w".to_string(), "int".to_string()),
                        ("h".to_string(), "int".to_string()),
                    ],
                },
                Step::Touch {
                    target: "Acme.Widget".to_string(),
                    change: ChangeKind::BaseTypeChange,
                },
                Step::Sweep,
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_ops_and_bad_config() {
        assert!(matches!(
            Scenario::from_toml_str("[[step]]\nop = \"explode\""),
            Err(CliError::Scenario(_))
        ));
        assert!(matches!(
            Scenario::from_toml_str("[mirror]\nexcluded_namespaces = [\"\"]"),
            Err(CliError::Mirror(_))
        ));
    }
}
