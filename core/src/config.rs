//! Mirror configuration
//!
//! Loaded from TOML. Every field has a default so an empty table is valid.

use crate::error::MirrorError;
use crate::error::MirrorResult;
use crate::types::is_within;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Framework and system namespaces that are never indexed or monitored.
    /// Matched by exact name or dotted prefix.
    pub excluded_namespaces: Vec<String>,

    /// Collapse a notification identical to the one just before it.
    pub collapse_repeated_notifications: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: vec!["System".to_string(), "Microsoft".to_string()],
            collapse_repeated_notifications: true,
        }
    }
}

impl MirrorConfig {
    pub fn from_toml_str(text: &str) -> MirrorResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> MirrorResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> MirrorResult<()> {
        if let Some(bad) = self
            .excluded_namespaces
            .iter()
            .find(|ns| ns.is_empty() || ns.starts_with('.') || ns.ends_with('.'))
        {
            return Err(MirrorError::Config(format!(
                "excluded namespace {bad:?} is not a dotted name"
            )));
        }
        Ok(())
    }

    /// True when `full_name` lies in a framework/system namespace.
    pub fn is_excluded(&self, full_name: &str) -> bool {
        self.excluded_namespaces
            .iter()
            .any(|ns| is_within(full_name, ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_table() {
        let config = MirrorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MirrorConfig::default());
        assert!(config.is_excluded("System.Collections.Generic"));
        assert!(config.is_excluded("Microsoft"));
        assert!(!config.is_excluded("Systematic.Core"));
    }

    #[test]
    fn test_partial_override() {
        let config = MirrorConfig::from_toml_str(
            r#"
excluded_namespaces = ["Vendor.Generated"]
"#,
        )
        .unwrap();
        assert!(config.collapse_repeated_notifications);
        assert!(config.is_excluded("Vendor.Generated.Proxy"));
        assert!(!config.is_excluded("System.Text"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            MirrorConfig::from_toml_str("excluded_namespaces = [\"System.\"]"),
            Err(MirrorError::Config(_))
        ));
        assert!(matches!(
            MirrorConfig::from_toml_str("sweep_after_every_notification = false"),
            Err(MirrorError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "collapse_repeated_notifications = false").unwrap();
        let config = MirrorConfig::load(file.path()).unwrap();
        assert!(!config.collapse_repeated_notifications);
    }
}
