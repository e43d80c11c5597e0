mod catalog;
mod source_config;

pub use catalog::{MaxEpsCatalog, Switchboard};
pub use source_config::{SourceConfig, SubModuleConfig};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{CoordinatorError, Result};

/// Breakdown for one source after a plan has been applied (or as read back
/// from disk), used both by `/api/o11y/eps/current` and `/api/o11y/sources/:name`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDetail {
    pub source: String,
    pub enabled: bool,
    pub max_eps: u64,
    pub num_uniq_key: u64,
    pub sub_key_total: u64,
    pub source_eps: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpsPlanResult {
    pub assigned: BTreeMap<String, u64>,
    pub new_keys: BTreeMap<String, u64>,
    pub cluster_eps: u64,
}

/// Computes and applies per-source `NumUniqKey` assignments so that the
/// cluster's aggregate EPS matches an operator-chosen budget.
pub struct EpsPlanner {
    max_eps_path: PathBuf,
    switchboard_path: PathBuf,
    sources_dir: PathBuf,
}

impl EpsPlanner {
    pub fn new(
        max_eps_path: impl Into<PathBuf>,
        switchboard_path: impl Into<PathBuf>,
        sources_dir: impl Into<PathBuf>,
    ) -> Self {
        EpsPlanner {
            max_eps_path: max_eps_path.into(),
            switchboard_path: switchboard_path.into(),
            sources_dir: sources_dir.into(),
        }
    }

    /// Runs the full distribute algorithm and rewrites every affected
    /// file. `selected` order is significant: the last element absorbs the
    /// rounding remainder, so callers must pass a stable, caller-meaningful
    /// order.
    pub fn apply(&self, selected: &[String], total_eps: u64) -> Result<EpsPlanResult> {
        if selected.is_empty() {
            return Err(CoordinatorError::Validation(
                "selected source list must not be empty".into(),
            ));
        }
        if total_eps == 0 {
            return Err(CoordinatorError::Validation(
                "totalEps must be greater than zero".into(),
            ));
        }

        let catalog = MaxEpsCatalog::load(&self.max_eps_path)?;

        let mut max_eps = Vec::with_capacity(selected.len());
        for s in selected {
            let m = catalog.max_eps(s).ok_or_else(|| {
                CoordinatorError::Validation(format!("unknown source '{s}'"))
            })?;
            max_eps.push(m);
        }
        let total_max: u64 = max_eps.iter().sum();
        if total_max == 0 {
            return Err(CoordinatorError::Validation(
                "selected sources have zero total max EPS".into(),
            ));
        }

        // Step 3: proportional assignment, last element absorbs the
        // remainder so the sum is exact.
        let mut assigned = BTreeMap::new();
        let mut running_total: u64 = 0;
        for (i, s) in selected.iter().enumerate() {
            let value = if i + 1 == selected.len() {
                total_eps.saturating_sub(running_total)
            } else {
                (total_eps as u128 * max_eps[i] as u128 / total_max as u128) as u64
            };
            running_total += value;
            assigned.insert(s.clone(), value);
        }

        // Step 4: per-source sub-key totals and new key counts.
        let mut new_keys = BTreeMap::new();
        for s in selected {
            let sub_key_total = source_config::sub_key_total(&self.sources_dir, s);
            let value = assigned[s] / sub_key_total.max(1);
            new_keys.insert(s.clone(), value.max(1));
        }

        // Step 5: switchboard owns exactly `selected`, everyone else false.
        let mut switchboard = Switchboard::load(&self.switchboard_path)?;
        switchboard.set_exclusively_enabled(&catalog.source_names(), selected);
        switchboard.save(&self.switchboard_path)?;

        // Step 6: per-source NumUniqKey, comment-preserving text rewrite.
        for s in selected {
            source_config::rewrite_num_uniq_key(&self.sources_dir, s, new_keys[s])?;
        }

        let cluster_eps = new_keys
            .iter()
            .map(|(s, k)| k * source_config::sub_key_total(&self.sources_dir, s).max(1))
            .sum();

        Ok(EpsPlanResult {
            assigned,
            new_keys,
            cluster_eps,
        })
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_switchboard_flag(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_switchboard_flag(name, false)
    }

    fn set_switchboard_flag(&self, name: &str, enabled: bool) -> Result<()> {
        let catalog = MaxEpsCatalog::load(&self.max_eps_path)?;
        if catalog.max_eps(name).is_none() {
            return Err(CoordinatorError::NotFound(format!("source '{name}'")));
        }
        let mut switchboard = Switchboard::load(&self.switchboard_path)?;
        switchboard.set_flag(name, enabled);
        switchboard.save(&self.switchboard_path)
    }

    /// Recomputes `clusterEPS` straight from the files on disk, without
    /// assuming anything about the last plan that was applied.
    pub fn current_eps(&self) -> Result<EpsPlanResult> {
        let catalog = MaxEpsCatalog::load(&self.max_eps_path)?;
        let switchboard = Switchboard::load(&self.switchboard_path)?;

        let mut assigned = BTreeMap::new();
        let mut new_keys = BTreeMap::new();
        let mut cluster_eps = 0u64;

        for name in catalog.source_names() {
            if !switchboard.is_enabled(&name) {
                continue;
            }
            let config = source_config::read_source_config(&self.sources_dir, &name);
            let sub_key_total = source_config::sub_key_total(&self.sources_dir, &name);
            let keys = config.map(|c| c.primary_num_uniq_key).unwrap_or(1).max(1);
            let source_eps = keys * sub_key_total.max(1);
            assigned.insert(name.clone(), source_eps);
            new_keys.insert(name.clone(), keys);
            cluster_eps += source_eps;
        }

        Ok(EpsPlanResult {
            assigned,
            new_keys,
            cluster_eps,
        })
    }

    pub fn source_details(&self, name: &str) -> Result<SourceDetail> {
        let catalog = MaxEpsCatalog::load(&self.max_eps_path)?;
        let max_eps = catalog
            .max_eps(name)
            .ok_or_else(|| CoordinatorError::NotFound(format!("source '{name}'")))?;
        let switchboard = Switchboard::load(&self.switchboard_path)?;
        let enabled = switchboard.is_enabled(name);
        let config = source_config::read_source_config(&self.sources_dir, name);
        let num_uniq_key = config.map(|c| c.primary_num_uniq_key).unwrap_or(1).max(1);
        let sub_key_total = source_config::sub_key_total(&self.sources_dir, name).max(1);

        Ok(SourceDetail {
            source: name.to_string(),
            enabled,
            max_eps,
            num_uniq_key,
            sub_key_total,
            source_eps: num_uniq_key * sub_key_total,
        })
    }

    pub fn catalog(&self) -> Result<MaxEpsCatalog> {
        MaxEpsCatalog::load(&self.max_eps_path)
    }

    pub fn switchboard(&self) -> Result<Switchboard> {
        Switchboard::load(&self.switchboard_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &std::path::Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn setup(dir: &std::path::Path, catalog_yaml: &str) -> EpsPlanner {
        write(dir, "max_eps.yaml", catalog_yaml);
        write(
            dir,
            "switchboard.yaml",
            "logging:\n  level: info\noutput:\n  kafka:\n    brokers: localhost:9092\ninclude_module_dirs: {}\n",
        );
        EpsPlanner::new(
            dir.join("max_eps.yaml"),
            dir.join("switchboard.yaml"),
            dir.join("sources"),
        )
    }

    #[test]
    fn s1_plan_distribution_matches_exactly() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sources/a.yaml", "primary:\n  NumUniqKey: 1\nsub_modules: [s1]\n");
        for i in 1..=25 {
            write(
                dir.path(),
                &format!("sources/a/s{i}.yaml"),
                "NumUniqKey: 1\n",
            );
        }
        write(dir.path(), "sources/b.yaml", "primary:\n  NumUniqKey: 1\nsub_modules: [s1]\n");
        for i in 1..=25 {
            write(
                dir.path(),
                &format!("sources/b/s{i}.yaml"),
                "NumUniqKey: 1\n",
            );
        }

        let planner = setup(dir.path(), "A: 40000\nB: 60000\n");
        let result = planner
            .apply(&["A".to_string(), "B".to_string()], 100_000)
            .unwrap();

        assert_eq!(result.assigned["A"], 40_000);
        assert_eq!(result.assigned["B"], 60_000);
        assert_eq!(result.new_keys["A"], 1_600);
        assert_eq!(result.new_keys["B"], 2_400);
        assert_eq!(result.cluster_eps, 100_000);
    }

    #[test]
    fn s2_plan_with_remainder_sums_exactly() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A", "B", "C"] {
            write(
                dir.path(),
                &format!("sources/{name}.yaml"),
                "primary:\n  NumUniqKey: 1\nsub_modules: []\n",
            );
        }

        let planner = setup(dir.path(), "A: 3\nB: 5\nC: 7\n");
        let result = planner
            .apply(&["A".to_string(), "B".to_string(), "C".to_string()], 100)
            .unwrap();

        assert_eq!(result.assigned["A"], 20);
        assert_eq!(result.assigned["B"], 33);
        assert_eq!(result.assigned["C"], 47);
        let sum: u64 = result.assigned.values().sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn i2_only_selected_sources_are_enabled() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A", "B", "C"] {
            write(
                dir.path(),
                &format!("sources/{name}.yaml"),
                "primary:\n  NumUniqKey: 1\nsub_modules: []\n",
            );
        }
        let planner = setup(dir.path(), "A: 10\nB: 10\nC: 10\n");
        planner.apply(&["A".to_string()], 5).unwrap();

        let switchboard = planner.switchboard().unwrap();
        assert!(switchboard.is_enabled("A"));
        assert!(!switchboard.is_enabled("B"));
        assert!(!switchboard.is_enabled("C"));
    }

    #[test]
    fn b2_all_submodules_unparseable_still_yields_at_least_one_key() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sources/A.yaml", "primary:\n  NumUniqKey: 1\nsub_modules: [broken1, broken2]\n");
        write(dir.path(), "sources/A/broken1.yaml", "not: valid: yaml: [\n");
        write(dir.path(), "sources/A/broken2.yaml", "not: valid: yaml: [\n");

        let planner = setup(dir.path(), "A: 1\n");
        let result = planner.apply(&["A".to_string()], 1).unwrap();
        assert!(result.new_keys["A"] >= 1);
    }

    #[test]
    fn s6_switchboard_rewrite_preserves_unrelated_sections() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sources/A.yaml", "primary:\n  NumUniqKey: 1\nsub_modules: []\n");
        let planner = setup(dir.path(), "A: 10000\n");

        planner.apply(&["A".to_string()], 10_000).unwrap();

        let rewritten = fs::read_to_string(dir.path().join("switchboard.yaml")).unwrap();
        assert!(rewritten.contains("level: info"));
        assert!(rewritten.contains("brokers: localhost:9092"));
    }

    #[test]
    fn apply_rejects_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let planner = setup(dir.path(), "A: 10\n");
        let err = planner.apply(&["ghost".to_string()], 10).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn apply_rejects_empty_selection() {
        let dir = tempfile::tempdir().unwrap();
        let planner = setup(dir.path(), "A: 10\n");
        let err = planner.apply(&[], 10).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }
}
