use std::path::Path;

use serde::Deserialize;

use crate::error::{CoordinatorError, Result};

/// One source catalog entry's static declaration of what it touches
/// downstream. Never mutated by this process.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceTopicsEntry {
    pub source: String,
    #[serde(default)]
    pub input_topics: Vec<String>,
    #[serde(default)]
    pub output_topics: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// The static topics/tables YAML: a list of per-source declarations keyed by
/// source name (which may be spelled differently than the switchboard's
/// keys for the same source — see `normalize_key`).
#[derive(Debug, Clone)]
pub struct TopicsTablesMap {
    entries: Vec<SourceTopicsEntry>,
}

impl TopicsTablesMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "topics/tables map not found, starting empty");
            return Ok(TopicsTablesMap {
                entries: Vec::new(),
            });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::Internal(format!("reading {}: {e}", path.display())))?;
        let entries: Vec<SourceTopicsEntry> = serde_yaml::from_str(&raw)
            .map_err(|e| CoordinatorError::ParseFailed(format!("{}: {e}", path.display())))?;
        Ok(TopicsTablesMap { entries })
    }

    pub fn entries(&self) -> &[SourceTopicsEntry] {
        &self.entries
    }

    pub fn source_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.source.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let map = TopicsTablesMap::load(dir.path().join("missing.yaml")).unwrap();
        assert!(map.entries().is_empty());
    }

    #[test]
    fn loads_declared_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics_tables.yaml");
        std::fs::write(
            &path,
            "- source: LinuxMonitor\n  input_topics: [raw.linux]\n  output_topics: [events.linux]\n  tables: [linux_events]\n",
        )
        .unwrap();

        let map = TopicsTablesMap::load(&path).unwrap();
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.entries()[0].tables, vec!["linux_events".to_string()]);
    }
}
