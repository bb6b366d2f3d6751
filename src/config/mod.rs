use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SnapshotError};

pub mod snapshots;

pub use snapshots::{
    ConnectionConfig, EnvironmentLocks, PlanConfig, PlanGroupConfig,
    SnapshotsConfig, UtilitiesConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "db-snapshots.json";
pub const DEFAULT_ENVIRONMENT: &str = "production";

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

pub fn load_config(path: &Path) -> Result<SnapshotsConfig> {
    if !path.exists() {
        return Err(SnapshotError::config(format!(
            "configuration file {} does not exist",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    let cfg: SnapshotsConfig = serde_json::from_str(&content)?;
    Ok(cfg)
}

/// Explicit override first, then the file's setting, then production.
pub fn resolve_environment(explicit: Option<&str>, cfg: &SnapshotsConfig) -> String {
    explicit
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .or_else(|| cfg.environment.clone())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg: SnapshotsConfig =
            serde_json::from_str(r#"{"plans":[{"name":"daily"}]}"#).unwrap();
        let plan = &cfg.plans[0];
        assert_eq!(plan.file_template, "db-snapshots-{date}");
        assert_eq!(plan.keep_last, 1);
        assert_eq!(plan.environment_locks.create, "production");
        assert_eq!(plan.environment_locks.load, "local");
        assert_eq!(cfg.utilities.gzip.as_deref(), Some("gzip"));
        assert_eq!(cfg.utilities.mysql.mysqldump, "mysqldump");
        assert_eq!(cfg.filesystem.local_path, "db-snapshots");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db-snapshots.json");
        fs::write(
            &path,
            r#"{
                "environment": "staging",
                "connections": {"main": {"driver": "pgsql", "host": "db", "database": "app"}},
                "plans": [{"name": "daily", "connection": "main", "keep_last": 3}]
            }"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.plans[0].keep_last, 3);
        assert_eq!(cfg.connections["main"].driver, "pgsql");
        assert_eq!(resolve_environment(None, &cfg), "staging");
        assert_eq!(resolve_environment(Some("local"), &cfg), "local");
    }

    #[test]
    fn test_missing_config_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_effective_host_prefers_read_host() {
        let mut conn = ConnectionConfig { host: "primary".into(), ..Default::default() };
        assert_eq!(conn.effective_host(), "primary");
        conn.read_host = Some("replica".into());
        assert_eq!(conn.effective_host(), "replica");
    }
}
