use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{CoordinatorError, Result};
use crate::registry::atomic_write;

#[derive(Debug, Clone, Deserialize)]
struct PrimaryBlock {
    #[serde(default = "default_num_uniq_key", rename = "NumUniqKey")]
    num_uniq_key: i64,
}

fn default_num_uniq_key() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct SourceYaml {
    #[serde(default)]
    primary: Option<PrimaryBlock>,
    #[serde(default)]
    sub_modules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubModuleYaml {
    #[serde(default = "default_num_uniq_key", rename = "NumUniqKey")]
    num_uniq_key: i64,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub primary_num_uniq_key: u64,
    pub sub_modules: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubModuleConfig {
    pub num_uniq_key: u64,
}

fn source_file(sources_dir: &Path, name: &str) -> PathBuf {
    sources_dir.join(format!("{name}.yaml"))
}

fn sub_module_file(sources_dir: &Path, name: &str, sub_module: &str) -> PathBuf {
    sources_dir.join(name).join(format!("{sub_module}.yaml"))
}

/// Reads a source's own config (its `NumUniqKey` and its declared
/// sub-modules). A missing or unparseable file is not fatal here — callers
/// that need the "contributes 1" fallback call this and substitute on `None`.
pub fn read_source_config(sources_dir: &Path, name: &str) -> Option<SourceConfig> {
    let path = source_file(sources_dir, name);
    let raw = std::fs::read_to_string(&path).ok()?;
    let parsed: SourceYaml = serde_yaml::from_str(&raw).ok()?;
    let num_uniq_key = parsed
        .primary
        .map(|p| p.num_uniq_key)
        .filter(|n| *n > 0)
        .unwrap_or(1) as u64;
    Some(SourceConfig {
        primary_num_uniq_key: num_uniq_key,
        sub_modules: parsed.sub_modules,
    })
}

fn read_sub_module_config(sources_dir: &Path, name: &str, sub_module: &str) -> Option<SubModuleConfig> {
    let path = sub_module_file(sources_dir, name, sub_module);
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: SubModuleYaml = serde_yaml::from_str(&raw).ok()?;
    if parsed.num_uniq_key <= 0 {
        return None;
    }
    Some(SubModuleConfig {
        num_uniq_key: parsed.num_uniq_key as u64,
    })
}

/// Sum of every declared sub-module's `NumUniqKey`. A sub-module whose file
/// is missing, unparseable, or whose `NumUniqKey` is `<= 0` contributes `1`
/// instead of being skipped. A source with no sub-modules at all totals
/// to `1`, so `assigned / sub_key_total` never divides by zero.
pub fn sub_key_total(sources_dir: &Path, name: &str) -> u64 {
    let Some(config) = read_source_config(sources_dir, name) else {
        return 1;
    };
    if config.sub_modules.is_empty() {
        return 1;
    }
    config
        .sub_modules
        .iter()
        .map(|sm| {
            read_sub_module_config(sources_dir, name, sm)
                .map(|c| c.num_uniq_key)
                .unwrap_or(1)
        })
        .sum::<u64>()
        .max(1)
}

/// Rewrites the `NumUniqKey:` line under the `primary:` block of a source's
/// config file in place, leaving every other line — including comments and
/// unrelated keys — untouched. This is a line-oriented text substitution, not
/// a structural YAML round-trip, because the source files in the field carry
/// hand-written comments a generic serializer would discard.
pub fn rewrite_num_uniq_key(sources_dir: &Path, name: &str, new_value: u64) -> Result<()> {
    let path = source_file(sources_dir, name);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| CoordinatorError::Internal(format!("reading {}: {e}", path.display())))?;

    let pattern = Regex::new(r"^(\s+NumUniqKey:\s*)(\d+)(.*)$").expect("static pattern is valid");
    let mut replaced = false;
    let mut out_lines = Vec::with_capacity(raw.lines().count());

    for line in raw.lines() {
        if !replaced {
            if let Some(caps) = pattern.captures(line) {
                out_lines.push(format!("{}{}{}", &caps[1], new_value, &caps[3]));
                replaced = true;
                continue;
            }
        }
        out_lines.push(line.to_string());
    }

    if !replaced {
        return Err(CoordinatorError::ParseFailed(format!(
            "{}: no indented NumUniqKey line found under primary",
            path.display()
        )));
    }

    let mut rewritten = out_lines.join("\n");
    if raw.ends_with('\n') {
        rewritten.push('\n');
    }
    atomic_write(&path, rewritten.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_preserves_comments_and_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A.yaml"),
            "# top comment\nprimary:\n  NumUniqKey: 10 # how many keys\nsub_modules: [x]\n",
        )
        .unwrap();

        rewrite_num_uniq_key(dir.path(), "A", 42).unwrap();

        let rewritten = std::fs::read_to_string(dir.path().join("A.yaml")).unwrap();
        assert!(rewritten.contains("# top comment"));
        assert!(rewritten.contains("NumUniqKey: 42 # how many keys"));
        assert!(rewritten.contains("sub_modules: [x]"));
    }

    #[test]
    fn sub_key_total_defaults_missing_submodule_to_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A.yaml"),
            "primary:\n  NumUniqKey: 1\nsub_modules: [missing]\n",
        )
        .unwrap();

        assert_eq!(sub_key_total(dir.path(), "A"), 1);
    }

    #[test]
    fn sub_key_total_with_no_submodules_is_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A.yaml"),
            "primary:\n  NumUniqKey: 1\nsub_modules: []\n",
        )
        .unwrap();

        assert_eq!(sub_key_total(dir.path(), "A"), 1);
    }

    #[test]
    fn sub_key_total_sums_valid_submodules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A.yaml"),
            "primary:\n  NumUniqKey: 1\nsub_modules: [s1, s2]\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("A")).unwrap();
        std::fs::write(dir.path().join("A/s1.yaml"), "NumUniqKey: 3\n").unwrap();
        std::fs::write(dir.path().join("A/s2.yaml"), "NumUniqKey: 4\n").unwrap();

        assert_eq!(sub_key_total(dir.path(), "A"), 7);
    }

    #[test]
    fn rewrite_missing_primary_line_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.yaml"), "sub_modules: []\n").unwrap();
        let err = rewrite_num_uniq_key(dir.path(), "A", 5).unwrap_err();
        assert!(matches!(err, CoordinatorError::ParseFailed(_)));
    }
}
