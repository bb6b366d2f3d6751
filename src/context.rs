use std::path::Path;
use std::sync::Arc;

use crate::config::SnapshotsConfig;
use crate::exec::{CommandExecutor, ProcessExecutor};
use crate::report::{NoopReporter, Reporter};
use crate::storage::{self, BlobStore, FsBlobStore};

/// Everything one invocation shares: configuration, the runtime environment
/// name, both storage tiers, the process runner and the operator listener.
pub struct SnapshotContext {
    pub config: SnapshotsConfig,
    pub environment: String,
    pub archive: Arc<dyn BlobStore>,
    pub local: Arc<dyn BlobStore>,
    pub executor: Arc<dyn CommandExecutor>,
    pub reporter: Arc<dyn Reporter>,
}

impl SnapshotContext {
    /// Filesystem tiers rooted per the config (relative roots resolve against
    /// `base`), real processes and no reporting.
    pub fn new(config: SnapshotsConfig, environment: impl Into<String>, base: &Path) -> Self {
        let archive = FsBlobStore::new(base.join(&config.filesystem.archive_root));
        let local = FsBlobStore::new(base.join(&config.filesystem.local_root));
        Self {
            config,
            environment: environment.into(),
            archive: Arc::new(archive),
            local: Arc::new(local),
            executor: Arc::new(ProcessExecutor),
            reporter: Arc::new(NoopReporter),
        }
    }

    #[cfg(test)]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn archive_path(&self) -> &str {
        self.config.filesystem.archive_path.trim_end_matches('/')
    }

    pub fn local_path(&self) -> &str {
        self.config.filesystem.local_path.trim_end_matches('/')
    }

    pub fn archive_file(&self, file_name: &str) -> String {
        storage::join(self.archive_path(), file_name)
    }

    pub fn local_file(&self, file_name: &str) -> String {
        storage::join(self.local_path(), file_name)
    }

    pub fn message(&self, message: &str) {
        self.reporter.message(message);
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::SnapshotContext;
    use crate::config::{ConnectionConfig, EnvironmentLocks, PlanConfig, SnapshotsConfig};
    use crate::exec::testing::RecordingExecutor;
    use crate::report::testing::CollectingReporter;

    pub struct Fixture {
        pub dir: TempDir,
        pub ctx: Arc<SnapshotContext>,
        pub executor: Arc<RecordingExecutor>,
        pub reporter: Arc<CollectingReporter>,
    }

    pub fn daily_plan() -> PlanConfig {
        PlanConfig {
            name: "daily".into(),
            connection: Some("mysql".into()),
            file_template: "db-snapshot-daily-{date:%Y%m%d}".into(),
            dump_options: "--single-transaction".into(),
            keep_last: 2,
            environment_locks: EnvironmentLocks::default(),
            ..Default::default()
        }
    }

    pub fn base_config(plans: Vec<PlanConfig>) -> SnapshotsConfig {
        let mut connections = BTreeMap::new();
        connections.insert(
            "mysql".to_string(),
            ConnectionConfig {
                driver: "mysql".into(),
                host: "127.0.0.1".into(),
                port: Some(3306),
                database: "laravel".into(),
                username: "root".into(),
                password: "secret".into(),
                read_host: None,
            },
        );
        connections.insert(
            "pgsql".to_string(),
            ConnectionConfig {
                driver: "pgsql".into(),
                host: "127.0.0.1".into(),
                port: Some(5432),
                database: "laravel".into(),
                username: "postgres".into(),
                password: "secret".into(),
                read_host: None,
            },
        );

        let mut cfg = SnapshotsConfig {
            connections,
            default_connection: Some("mysql".into()),
            plans,
            ..Default::default()
        };
        cfg.filesystem.archive_path = "cloud-snapshots".into();
        cfg
    }

    pub fn fixture_with(config: SnapshotsConfig, environment: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let reporter = Arc::new(CollectingReporter::default());
        let ctx = SnapshotContext::new(config, environment, dir.path())
            .with_executor(executor.clone())
            .with_reporter(reporter.clone());
        Fixture { dir, ctx: Arc::new(ctx), executor, reporter }
    }

    pub fn fixture(plans: Vec<PlanConfig>) -> Fixture {
        fixture_with(base_config(plans), "production")
    }
}
