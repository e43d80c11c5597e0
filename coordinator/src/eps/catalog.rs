use std::collections::HashMap;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::{CoordinatorError, Result};
use crate::registry::atomic_write;

const SWITCHBOARD_KEY: &str = "include_module_dirs";

/// Flat `source name -> max EPS` table. Read-only from the planner's
/// perspective; nothing in this crate ever writes it back.
#[derive(Debug, Clone)]
pub struct MaxEpsCatalog {
    entries: HashMap<String, u64>,
}

impl MaxEpsCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "max-EPS catalog not found, starting empty");
            return Ok(MaxEpsCatalog {
                entries: HashMap::new(),
            });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::Internal(format!("reading {}: {e}", path.display())))?;
        let entries: HashMap<String, u64> = serde_yaml::from_str(&raw)
            .map_err(|e| CoordinatorError::ParseFailed(format!("{}: {e}", path.display())))?;
        Ok(MaxEpsCatalog { entries })
    }

    pub fn max_eps(&self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn entries(&self) -> &HashMap<String, u64> {
        &self.entries
    }
}

/// The master module switchboard. Holds the whole YAML document as a generic
/// [`Value`] so that sections unrelated to source enablement (logging,
/// output sinks, ...) survive a rewrite byte-for-byte — only the
/// `include_module_dirs` sub-map is ever touched.
#[derive(Debug, Clone)]
pub struct Switchboard {
    doc: Value,
}

impl Switchboard {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut doc = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                CoordinatorError::Internal(format!("reading {}: {e}", path.display()))
            })?;
            serde_yaml::from_str(&raw)
                .map_err(|e| CoordinatorError::ParseFailed(format!("{}: {e}", path.display())))?
        } else {
            tracing::warn!(path = %path.display(), "switchboard not found, starting empty");
            Value::Mapping(Mapping::new())
        };
        // An empty or freshly-touched file parses as `Value::Null`, not a
        // mapping; normalize it so every later operation can assume a
        // mapping root without panicking.
        if !doc.is_mapping() {
            doc = Value::Mapping(Mapping::new());
        }
        Ok(Switchboard { doc })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.doc)
            .map_err(|e| CoordinatorError::Internal(format!("serializing switchboard: {e}")))?;
        atomic_write(path.as_ref(), yaml.as_bytes())
    }

    fn submap_mut(&mut self) -> &mut Mapping {
        let root = self
            .doc
            .as_mapping_mut()
            .expect("switchboard document root must be a mapping");
        let key = Value::String(SWITCHBOARD_KEY.to_string());
        if !matches!(root.get(&key), Some(Value::Mapping(_))) {
            root.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        root.get_mut(&key).unwrap().as_mapping_mut().unwrap()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.doc
            .as_mapping()
            .and_then(|root| root.get(Value::String(SWITCHBOARD_KEY.to_string())))
            .and_then(|sub| sub.as_mapping())
            .and_then(|sub| sub.get(Value::String(name.to_string())))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: &str, enabled: bool) {
        let sub = self.submap_mut();
        sub.insert(Value::String(name.to_string()), Value::Bool(enabled));
    }

    /// Enables exactly `selected` among `all_sources`, disabling everything
    /// else the catalog knows about. Sources not present in the catalog
    /// at all are left untouched.
    pub fn set_exclusively_enabled(&mut self, all_sources: &[String], selected: &[String]) {
        let selected_set: std::collections::HashSet<&str> =
            selected.iter().map(String::as_str).collect();
        let sub = self.submap_mut();
        for name in all_sources {
            sub.insert(
                Value::String(name.clone()),
                Value::Bool(selected_set.contains(name.as_str())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = MaxEpsCatalog::load(dir.path().join("missing.yaml")).unwrap();
        assert!(catalog.source_names().is_empty());
    }

    #[test]
    fn switchboard_round_trips_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(&path, "include_module_dirs:\n  A: false\n").unwrap();

        let mut sb = Switchboard::load(&path).unwrap();
        assert!(!sb.is_enabled("A"));
        sb.set_flag("A", true);
        sb.save(&path).unwrap();

        let reloaded = Switchboard::load(&path).unwrap();
        assert!(reloaded.is_enabled("A"));
    }

    #[test]
    fn switchboard_preserves_unrelated_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(
            &path,
            "logging:\n  level: info\ninclude_module_dirs:\n  A: true\n",
        )
        .unwrap();

        let mut sb = Switchboard::load(&path).unwrap();
        sb.set_flag("A", false);
        sb.save(&path).unwrap();

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("level: info"));
    }

    #[test]
    fn switchboard_with_empty_file_does_not_panic_on_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(&path, "").unwrap();

        let mut sb = Switchboard::load(&path).unwrap();
        assert!(!sb.is_enabled("A"));
        sb.set_flag("A", true);
        sb.save(&path).unwrap();

        let reloaded = Switchboard::load(&path).unwrap();
        assert!(reloaded.is_enabled("A"));
    }

    #[test]
    fn switchboard_with_non_mapping_root_normalizes_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(&path, "- just\n- a\n- list\n").unwrap();

        let mut sb = Switchboard::load(&path).unwrap();
        assert!(!sb.is_enabled("A"));
        sb.set_flag("A", true);
        assert!(sb.is_enabled("A"));
    }
}
