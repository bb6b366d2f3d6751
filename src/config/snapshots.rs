use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level contents of the snapshots configuration file.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub environment: Option<String>,
    pub default_connection: Option<String>,
    /// Keep downloaded artifacts in the local tier after a load.
    pub cache_by_default: bool,
    pub filesystem: FilesystemConfig,
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Statements run after any plan is loaded, before the plan's own.
    pub post_load_sqls: Vec<String>,
    pub plan_groups: Vec<PlanGroupConfig>,
    pub plans: Vec<PlanConfig>,
    pub utilities: UtilitiesConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct FilesystemConfig {
    pub local_root: String,
    pub local_path: String,
    pub archive_root: String,
    pub archive_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            local_root: "storage".into(),
            local_path: "db-snapshots".into(),
            archive_root: "archive".into(),
            archive_path: "db-snapshots".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConnectionConfig {
    /// Engine name: mysql, mariadb, pgsql, postgres or postgresql.
    pub driver: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Replica host preferred for dumps when present.
    #[serde(default)]
    pub read_host: Option<String>,
}

impl ConnectionConfig {
    pub fn effective_host(&self) -> &str {
        self.read_host.as_deref().unwrap_or(&self.host)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PlanConfig {
    pub name: String,
    pub connection: Option<String>,
    pub file_template: String,
    pub dump_options: String,
    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub schema_only_tables: Vec<String>,
    pub keep_last: usize,
    pub environment_locks: EnvironmentLocks,
    pub post_load_sqls: Vec<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            connection: None,
            file_template: "db-snapshots-{date}".into(),
            dump_options: String::new(),
            tables: Vec::new(),
            ignore_tables: Vec::new(),
            schema_only_tables: Vec::new(),
            keep_last: 1,
            environment_locks: EnvironmentLocks::default(),
            post_load_sqls: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentLocks {
    pub create: String,
    pub load: String,
}

impl Default for EnvironmentLocks {
    fn default() -> Self {
        Self { create: "production".into(), load: "local".into() }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PlanGroupConfig {
    pub name: String,
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default)]
    pub post_load_sqls: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct UtilitiesConfig {
    pub mysql: MysqlUtilities,
    pub pgsql: PgsqlUtilities,
    pub zcat: String,
    /// Compression is skipped entirely when unset.
    pub gzip: Option<String>,
}

impl Default for UtilitiesConfig {
    fn default() -> Self {
        Self {
            mysql: MysqlUtilities::default(),
            pgsql: PgsqlUtilities::default(),
            zcat: "zcat".into(),
            gzip: Some("gzip".into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MysqlUtilities {
    pub mysqldump: String,
    pub mysql: String,
}

impl Default for MysqlUtilities {
    fn default() -> Self {
        Self { mysqldump: "mysqldump".into(), mysql: "mysql".into() }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PgsqlUtilities {
    pub pg_dump: String,
    pub psql: String,
}

impl Default for PgsqlUtilities {
    fn default() -> Self {
        Self { pg_dump: "pg_dump".into(), psql: "psql".into() }
    }
}
