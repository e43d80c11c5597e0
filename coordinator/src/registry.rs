use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

/// One cluster member. `enabled = false` keeps the entry around but hides it
/// from the binary controller, the metrics collector, and the reset
/// orchestrator (I5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub name: String,
    pub host: String,
    pub user: String,
    pub key_path: String,
    pub remote_config_dir: String,
    pub remote_bin_dir: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_agent_port: u16,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: u32,
    #[serde(default = "default_conflict_policy")]
    pub conflict_policy: String,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_retries() -> u32 {
    3
}
fn default_sync_timeout() -> u64 {
    30
}
fn default_backup_retention() -> u32 {
    5
}
fn default_conflict_policy() -> String {
    "last-write-wins".to_string()
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            connect_timeout_secs: default_connect_timeout(),
            retries: default_retries(),
            sync_timeout_secs: default_sync_timeout(),
            backup_retention: default_backup_retention(),
            conflict_policy: default_conflict_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryDocument {
    #[serde(default)]
    nodes: HashMap<String, NodeEntry>,
    #[serde(default)]
    settings: ClusterSettings,
}

/// Sole owner of `nodes.yaml`. Reads are lock-free snapshots (a read-lock
/// clone); writes serialize through the write-lock and finish by rewriting
/// the whole file atomically (temp file + rename, in the same directory so
/// the rename can't cross filesystems).
pub struct NodeRegistry {
    path: PathBuf,
    doc: RwLock<RegistryDocument>,
}

impl NodeRegistry {
    /// Loads the registry from `path`. A missing file is not fatal: this
    /// starts from an empty registry with default cluster settings and logs
    /// a warning, matching the "configuration absence is a warning" policy.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                CoordinatorError::Internal(format!("reading {}: {e}", path.display()))
            })?;
            serde_yaml::from_str(&raw)
                .map_err(|e| CoordinatorError::ParseFailed(format!("{}: {e}", path.display())))?
        } else {
            tracing::warn!(path = %path.display(), "registry file not found, starting empty");
            RegistryDocument::default()
        };

        Ok(NodeRegistry {
            path,
            doc: RwLock::new(doc),
        })
    }

    fn save_locked(&self, doc: &RegistryDocument) -> Result<()> {
        let yaml = serde_yaml::to_string(doc)
            .map_err(|e| CoordinatorError::Internal(format!("serializing registry: {e}")))?;
        atomic_write(&self.path, yaml.as_bytes())
    }

    pub fn list(&self) -> Vec<NodeEntry> {
        let doc = self.doc.read();
        let mut entries: Vec<_> = doc.nodes.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn list_enabled(&self) -> Vec<NodeEntry> {
        self.list().into_iter().filter(|n| n.enabled).collect()
    }

    pub fn get(&self, name: &str) -> Result<NodeEntry> {
        self.doc
            .read()
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(format!("node '{name}'")))
    }

    pub fn add(&self, entry: NodeEntry) -> Result<NodeEntry> {
        validate_entry(&entry)?;
        let mut doc = self.doc.write();
        if doc.nodes.contains_key(&entry.name) {
            return Err(CoordinatorError::Duplicate(format!(
                "node '{}'",
                entry.name
            )));
        }
        doc.nodes.insert(entry.name.clone(), entry.clone());
        self.save_locked(&doc)?;
        Ok(entry)
    }

    /// Swaps `old_name`'s entry for `entry` under a single write lock.
    /// Validates `entry` before touching the document, so a rejected
    /// replacement (e.g. an empty field) never removes the old entry.
    pub fn replace(&self, old_name: &str, entry: NodeEntry) -> Result<NodeEntry> {
        validate_entry(&entry)?;
        let mut doc = self.doc.write();
        if !doc.nodes.contains_key(old_name) {
            return Err(CoordinatorError::NotFound(format!("node '{old_name}'")));
        }
        if entry.name != old_name && doc.nodes.contains_key(&entry.name) {
            return Err(CoordinatorError::Duplicate(format!(
                "node '{}'",
                entry.name
            )));
        }
        doc.nodes.remove(old_name);
        doc.nodes.insert(entry.name.clone(), entry.clone());
        self.save_locked(&doc)?;
        Ok(entry)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if doc.nodes.remove(name).is_none() {
            return Err(CoordinatorError::NotFound(format!("node '{name}'")));
        }
        self.save_locked(&doc)
    }

    pub fn enable(&self, name: &str) -> Result<NodeEntry> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<NodeEntry> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<NodeEntry> {
        let mut doc = self.doc.write();
        let entry = doc
            .nodes
            .get_mut(name)
            .ok_or_else(|| CoordinatorError::NotFound(format!("node '{name}'")))?;
        entry.enabled = enabled;
        let updated = entry.clone();
        self.save_locked(&doc)?;
        Ok(updated)
    }

    pub fn get_settings(&self) -> ClusterSettings {
        self.doc.read().settings.clone()
    }

    pub fn update_settings(&self, settings: ClusterSettings) -> Result<ClusterSettings> {
        let mut doc = self.doc.write();
        doc.settings = settings.clone();
        self.save_locked(&doc)?;
        Ok(settings)
    }
}

fn validate_entry(entry: &NodeEntry) -> Result<()> {
    if entry.name.trim().is_empty() {
        return Err(CoordinatorError::Validation("name must not be empty".into()));
    }
    if entry.host.trim().is_empty() {
        return Err(CoordinatorError::Validation("host must not be empty".into()));
    }
    if entry.user.trim().is_empty() {
        return Err(CoordinatorError::Validation("user must not be empty".into()));
    }
    if entry.key_path.trim().is_empty() {
        return Err(CoordinatorError::Validation(
            "key_path must not be empty".into(),
        ));
    }
    // Key path existence is intentionally not checked here: it's surfaced
    // lazily by the remote shell the first time it's used.
    Ok(())
}

/// Writes `contents` to `path` by first writing a sibling temp file in the
/// same directory, then renaming it over `path`. The rename is atomic on any
/// POSIX filesystem, so a concurrent reader always observes either the full
/// old document or the full new one.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|e| CoordinatorError::Internal(format!("creating {}: {e}", dir.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CoordinatorError::Internal(format!("creating temp file: {e}")))?;
    tmp.write_all(contents)
        .map_err(|e| CoordinatorError::Internal(format!("writing temp file: {e}")))?;
    tmp.flush()
        .map_err(|e| CoordinatorError::Internal(format!("flushing temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| CoordinatorError::Internal(format!("persisting {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> NodeEntry {
        NodeEntry {
            name: name.to_string(),
            host: "10.0.0.1".to_string(),
            user: "loadgen".to_string(),
            key_path: "/home/loadgen/.ssh/id_rsa".to_string(),
            remote_config_dir: "/opt/loadgen/conf".to_string(),
            remote_bin_dir: "/opt/loadgen/bin".to_string(),
            metrics_agent_port: 9100,
            description: "".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn add_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        reg.add(entry("node-a")).unwrap();
        assert_eq!(reg.list().len(), 1);

        reg.remove("node-a").unwrap();
        assert!(reg.list().is_empty());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        reg.add(entry("node-a")).unwrap();
        let err = reg.add(entry("node-a")).unwrap_err();
        assert!(matches!(err, CoordinatorError::Duplicate(_)));
    }

    #[test]
    fn replace_renames_and_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();
        reg.add(entry("node-a")).unwrap();

        let mut renamed = entry("node-b");
        renamed.host = "10.0.0.99".to_string();
        reg.replace("node-a", renamed).unwrap();

        assert!(reg.get("node-a").is_err());
        assert_eq!(reg.get("node-b").unwrap().host, "10.0.0.99");
    }

    #[test]
    fn replace_rejects_invalid_entry_without_losing_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();
        reg.add(entry("node-a")).unwrap();

        let mut bad = entry("node-a");
        bad.host = "".to_string();
        let err = reg.replace("node-a", bad).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        assert!(reg.get("node-a").is_ok());
    }

    #[test]
    fn replace_missing_node_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        let err = reg.replace("ghost", entry("ghost")).unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        let err = reg.remove("ghost").unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[test]
    fn disable_then_enable_then_disable_matches_single_disable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();
        reg.add(entry("node-a")).unwrap();

        reg.disable("node-a").unwrap();
        reg.enable("node-a").unwrap();
        reg.disable("node-a").unwrap();
        let sequence_result = std::fs::read_to_string(&path).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        let path2 = dir2.path().join("nodes.yaml");
        let reg2 = NodeRegistry::load(&path2).unwrap();
        reg2.add(entry("node-a")).unwrap();
        reg2.disable("node-a").unwrap();
        let single_result = std::fs::read_to_string(&path2).unwrap();

        assert_eq!(sequence_result, single_result);
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        let mut bad = entry("node-a");
        bad.host = "".to_string();
        let err = reg.add(bad).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn disabled_nodes_are_excluded_from_list_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let reg = NodeRegistry::load(&path).unwrap();

        reg.add(entry("node-a")).unwrap();
        reg.add(entry("node-b")).unwrap();
        reg.disable("node-b").unwrap();

        let enabled_names: Vec<_> = reg.list_enabled().into_iter().map(|n| n.name).collect();
        assert_eq!(enabled_names, vec!["node-a".to_string()]);
    }

    #[test]
    fn missing_file_loads_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.yaml");
        let reg = NodeRegistry::load(&path).unwrap();
        assert!(reg.list().is_empty());
        assert_eq!(reg.get_settings(), ClusterSettings::default());
    }
}
