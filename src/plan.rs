use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, EnvironmentLocks, PlanConfig};
use crate::context::SnapshotContext;
use crate::drivers::DatabaseDriver;
use crate::drivers::selector::select_driver;
use crate::error::{Result, SnapshotError};
use crate::exec::{CommandOutput, OutputTarget, ShellCommand};
use crate::snapshot::Snapshot;
use crate::storage;
use crate::template::FileTemplate;
use crate::utils::hash::unique_token;

/// Extension of a fresh dump before compression.
pub const DUMP_EXTENSION: &str = ".sql";
pub const GZIP_EXTENSION: &str = ".gz";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementScope {
    Global,
    Group,
    Plan,
}

/// Outcome of one post-load statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostLoadResult {
    pub statement: String,
    pub scope: StatementScope,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoadOptions {
    pub use_local_copy: bool,
    pub force_download: bool,
    /// Leave the downloaded artifact in the local tier afterwards.
    pub keep_cached: bool,
    pub skip_post_commands: bool,
    /// Drop every table of the target database before restoring.
    pub drop_tables: bool,
}

#[derive(Clone, Debug)]
pub struct LoadReport {
    pub plan: String,
    pub file_name: String,
    pub downloaded: bool,
    pub post_load: Vec<PostLoadResult>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlanSettings {
    pub name: String,
    pub connection: String,
    pub file_template: String,
    pub dump_options: String,
    pub keep_last: usize,
    pub environment_locks: EnvironmentLocks,
}

/// A named, recurring family of snapshots of one connection.
pub struct SnapshotPlan {
    pub name: String,
    pub connection_name: String,
    pub file_template: String,
    pub dump_options: String,
    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub schema_only_tables: Vec<String>,
    pub keep_last: usize,
    pub environment_locks: EnvironmentLocks,
    pub post_load_sqls: Vec<String>,
    template: FileTemplate,
    dump_args: Vec<String>,
    connection: ConnectionConfig,
    driver: Arc<dyn DatabaseDriver>,
    /// Newest first once reconciled.
    snapshots: Vec<Snapshot>,
    ctx: Arc<SnapshotContext>,
}

impl SnapshotPlan {
    pub fn new(config: &PlanConfig, ctx: Arc<SnapshotContext>) -> Result<Self> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(SnapshotError::config("snapshot plans must have a name"));
        }

        let template = FileTemplate::parse(&config.file_template)?;

        if !config.tables.is_empty() && !config.ignore_tables.is_empty() {
            return Err(SnapshotError::config(format!(
                "plan '{}': tables and ignore_tables cannot both be configured",
                name
            )));
        }
        if !config.tables.is_empty() {
            let tables: BTreeSet<&String> = config.tables.iter().collect();
            if let Some(missing) = config.schema_only_tables.iter().find(|t| !tables.contains(t)) {
                return Err(SnapshotError::config(format!(
                    "plan '{}': schema_only_tables that are configured must appear in tables as well ('{}' does not)",
                    name, missing
                )));
            }
        }

        let dump_args = shell_words::split(&config.dump_options).map_err(|e| {
            SnapshotError::config(format!("plan '{}': invalid dump_options: {}", name, e))
        })?;

        let connection_name = config
            .connection
            .clone()
            .or_else(|| ctx.config.default_connection.clone())
            .ok_or_else(|| SnapshotError::config(format!("plan '{}' has no connection configured", name)))?;
        let connection = ctx.config.connections.get(&connection_name).cloned().ok_or_else(|| {
            SnapshotError::config(format!("A database connection for name {} does not exist", connection_name))
        })?;
        let driver = select_driver(&connection, &ctx.config.utilities, &unique_token(&name))?;

        debug!(plan = %name, driver = driver.name(), template = %config.file_template, "plan configured");

        Ok(Self {
            name,
            connection_name,
            file_template: config.file_template.clone(),
            dump_options: config.dump_options.clone(),
            tables: config.tables.clone(),
            ignore_tables: config.ignore_tables.clone(),
            schema_only_tables: config.schema_only_tables.clone(),
            keep_last: config.keep_last,
            environment_locks: config.environment_locks.clone(),
            post_load_sqls: config.post_load_sqls.clone(),
            template,
            dump_args,
            connection,
            driver,
            snapshots: Vec::new(),
            ctx,
        })
    }

    pub fn template(&self) -> &FileTemplate {
        &self.template
    }

    #[cfg(test)]
    pub fn driver(&self) -> &dyn DatabaseDriver {
        self.driver.as_ref()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn find_snapshot(&self, file_name: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.file_name == file_name)
    }

    /// By file name, or by 1-based position in the newest-first list.
    pub fn lookup(&self, key: &str) -> Option<&Snapshot> {
        if let Some(found) = self.find_snapshot(key) {
            return Some(found);
        }
        match key.parse::<usize>() {
            Ok(index) if index >= 1 => self.snapshots.get(index - 1),
            _ => None,
        }
    }

    pub fn settings(&self) -> PlanSettings {
        PlanSettings {
            name: self.name.clone(),
            connection: self.connection_name.clone(),
            file_template: self.file_template.clone(),
            dump_options: self.dump_options.clone(),
            keep_last: self.keep_last,
            environment_locks: self.environment_locks.clone(),
        }
    }

    pub fn can_create(&self) -> bool {
        self.ctx.environment == self.environment_locks.create
    }

    pub fn can_load(&self) -> bool {
        self.ctx.environment == self.environment_locks.load
    }

    /// Executables needed to create and load this plan's snapshots.
    pub fn required_utilities(&self) -> Vec<String> {
        let mut out = self.driver.utilities();
        if let Some(gzip) = self.gzip() {
            out.push(gzip.to_string());
        }
        out.push(self.ctx.config.utilities.zcat.clone());
        out
    }

    fn gzip(&self) -> Option<&str> {
        self.ctx.config.utilities.gzip.as_deref().filter(|g| !g.is_empty())
    }

    pub fn create(&mut self) -> Result<Snapshot> {
        self.create_at(Local::now().naive_local())
    }

    /// Dump, compress and archive a snapshot stamped with `now`.
    pub fn create_at(&mut self, now: NaiveDateTime) -> Result<Snapshot> {
        let mut file_name = format!("{}{}", self.template.file_stem(&now), DUMP_EXTENSION);

        let local = self.ctx.local.clone();
        local.make_dir(self.ctx.local_path())?;
        let mut local_file = self.ctx.local_file(&file_name);
        let mut local_full = local.local_path(&local_file).to_string_lossy().to_string();

        let commands = self.driver.build_dump_command(
            &local_full,
            &self.dump_args,
            &self.tables,
            &self.ignore_tables,
            &self.schema_only_tables,
            &self.connection.database,
        );
        for command in &commands {
            if let Err(e) = self.run_with_credentials(command) {
                discard(local.as_ref(), &local_file);
                return Err(e);
            }
        }

        if let Some(gzip) = self.gzip() {
            let command = ShellCommand::new(gzip).arg("-f").arg(&local_full);
            self.ctx.message(&format!("Running: {}", command));

            let outcome = self.ctx.executor.run(&command);
            let failure = match outcome {
                Ok(output) if output.success => None,
                Ok(output) => Some(output.failure_message("gzip command failed")),
                Err(e) => Some(format!("gzip command failed: {}", e)),
            };
            if let Some(message) = failure {
                discard(local.as_ref(), &local_file);
                discard(local.as_ref(), &format!("{}{}", local_file, GZIP_EXTENSION));
                return Err(SnapshotError::execution(message));
            }

            file_name.push_str(GZIP_EXTENSION);
            local_file.push_str(GZIP_EXTENSION);
            local_full.push_str(GZIP_EXTENSION);
        }

        let archive_file = self.ctx.archive_file(&file_name);
        self.ctx.message(&format!("Uploading {}", archive_file));
        let uploaded = self.ctx.archive.put_file(&archive_file, local.local_path(&local_file).as_path());
        discard(local.as_ref(), &local_file);
        uploaded?;

        info!(plan = %self.name, file = %file_name, "snapshot created");

        // Dated by what the name encodes, so it matches a later reconcile.
        let date = self.template.match_file(&file_name).unwrap_or(now);
        let snapshot = Snapshot::new(file_name, date, &self.name, self.ctx.clone());
        // Same name means the artifact was overwritten; the listed entry stays.
        if self.find_snapshot(&snapshot.file_name).is_none() {
            self.snapshots.insert(0, snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Run `command` with this plan's credentials substituted in. The secret
    /// file is removed whatever the outcome.
    pub(crate) fn run_with_credentials(&self, command: &ShellCommand) -> Result<CommandOutput> {
        let local = self.ctx.local.as_ref();
        self.ctx.message(&format!("Running: {}", command));

        let outcome = self.driver.write_credentials(&self.connection, local).and_then(|subs| {
            debug!(plan = %self.name, driver = self.driver.name(), "credentials written");
            self.ctx.executor.run(&subs.apply(command))
        });

        self.driver.cleanup_credentials(local);
        self.ctx.message("Cleaned up credentials");

        let output = outcome?;
        if !output.success {
            return Err(SnapshotError::execution(output.failure_message("Command failed")));
        }
        Ok(output)
    }

    /// Drop every table on this plan's connection.
    pub fn drop_local_tables(&self) -> Result<()> {
        self.ctx.message(&format!("Dropping all tables on connection {}", self.connection_name));
        let command = self.driver.build_drop_tables_command(&self.connection.database);
        self.run_with_credentials(&command).map(|_| ())
    }

    pub(crate) fn run_statement(&self, sql: &str) -> Result<()> {
        let command = self.driver.build_statement_command(sql, &self.connection.database);
        self.run_with_credentials(&command).map(|_| ())
    }

    pub fn match_file_and_date(&self, file_name: &str) -> Option<NaiveDateTime> {
        self.template.match_file(file_name)
    }

    /// Take ownership of an archived file if it matches this plan's template.
    pub fn accept(&mut self, file_name: &str) -> bool {
        match self.match_file_and_date(file_name) {
            Some(date) => {
                self.snapshots.push(Snapshot::new(file_name, date, &self.name, self.ctx.clone()));
                true
            }
            None => false,
        }
    }

    /// Newest first; snapshots with equal dates keep their order.
    pub(crate) fn sort_snapshots(&mut self) {
        self.snapshots.sort_by(|a, b| b.date.cmp(&a.date));
    }

    pub fn cleanup_count(&self) -> usize {
        self.snapshots.len().saturating_sub(self.keep_last)
    }

    /// Delete every snapshot beyond the newest `keep_last`.
    pub fn cleanup(&mut self) -> usize {
        if self.snapshots.len() <= self.keep_last {
            return 0;
        }
        let expired = self.snapshots.split_off(self.keep_last);
        for snapshot in &expired {
            self.ctx.message(&format!("Removing {}", snapshot.file_name));
            if !snapshot.remove() {
                warn!(plan = %self.name, file = %snapshot.file_name, "archive copy was not deleted");
            }
        }
        info!(plan = %self.name, removed = expired.len(), "cleanup finished");
        expired.len()
    }

    /// Delete cached files belonging to this plan, except `keep`.
    pub fn clear_cached(&self, keep: Option<&str>) -> Result<Vec<String>> {
        let mut cleared = Vec::new();
        for path in self.ctx.local.list(self.ctx.local_path())? {
            let Some(file_name) = storage::file_name_under(self.ctx.local_path(), &path) else {
                continue;
            };
            if self.match_file_and_date(file_name).is_none() || keep == Some(file_name) {
                continue;
            }
            self.ctx.local.delete(&path)?;
            cleared.push(file_name.to_string());
        }
        Ok(cleared)
    }

    /// Global statements first, then this plan's. A failing statement does
    /// not stop the rest.
    pub fn execute_post_load_commands(&self) -> Vec<PostLoadResult> {
        let global = self.ctx.config.post_load_sqls.iter().map(|s| (s, StatementScope::Global));
        let own = self.post_load_sqls.iter().map(|s| (s, StatementScope::Plan));
        global.chain(own).map(|(sql, scope)| self.execute_statement(sql, scope)).collect()
    }

    pub(crate) fn execute_statement(&self, sql: &str, scope: StatementScope) -> PostLoadResult {
        self.ctx.message(&format!("Running SQL: {}", sql));
        match self.run_statement(sql) {
            Ok(()) => PostLoadResult { statement: sql.to_string(), scope, success: true, error: None },
            Err(e) => {
                warn!(plan = %self.name, statement = sql, error = %e, "post-load statement failed");
                PostLoadResult { statement: sql.to_string(), scope, success: false, error: Some(e.to_string()) }
            }
        }
    }

    /// Restore `snapshot` into this plan's connection.
    pub fn load(&self, snapshot: &Snapshot, options: &LoadOptions) -> Result<LoadReport> {
        self.ctx.message(&format!("Loading {} into connection {}", snapshot.file_name, self.connection_name));
        let info = snapshot.download(options.use_local_copy, options.force_download)?;

        let local = self.ctx.local.as_ref();
        let cached_full = local.local_path(&info.local_file).to_string_lossy().to_string();

        let staged = match snapshot.file_name.strip_suffix(GZIP_EXTENSION) {
            Some(plain) => {
                let staged_file = self.ctx.local_file(&format!("{}.loading", plain));
                let staged_full = local.local_path(&staged_file).to_string_lossy().to_string();
                let command = ShellCommand::new(&self.ctx.config.utilities.zcat)
                    .arg(&cached_full)
                    .stdout_to(OutputTarget::Truncate(staged_full.clone()));
                self.ctx.message(&format!("Running: {}", command));

                let failure = match self.ctx.executor.run(&command) {
                    Ok(output) if output.success => None,
                    Ok(output) => Some(output.failure_message("zcat command failed")),
                    Err(e) => Some(format!("zcat command failed: {}", e)),
                };
                if let Some(message) = failure {
                    discard(local, &staged_file);
                    return Err(SnapshotError::execution(message));
                }
                Some((staged_file, staged_full))
            }
            None => None,
        };

        let input = staged.as_ref().map(|(_, full)| full.as_str()).unwrap_or(cached_full.as_str());
        let command = self.driver.build_load_command(input, &self.connection.database);
        let prepared = if options.drop_tables { self.drop_local_tables() } else { Ok(()) };
        let loaded = prepared.and_then(|()| self.run_with_credentials(&command));
        if let Some((staged_file, _)) = &staged {
            discard(local, staged_file);
        }
        loaded?;

        let keep = options.keep_cached || options.use_local_copy || self.ctx.config.cache_by_default;
        if !keep {
            snapshot.remove_local()?;
        }
        info!(plan = %self.name, file = %snapshot.file_name, downloaded = info.downloaded, "snapshot loaded");

        let post_load = if options.skip_post_commands {
            Vec::new()
        } else {
            self.execute_post_load_commands()
        };

        Ok(LoadReport {
            plan: self.name.clone(),
            file_name: snapshot.file_name.clone(),
            downloaded: info.downloaded,
            post_load,
        })
    }
}

fn discard(store: &dyn storage::BlobStore, path: &str) {
    if let Err(e) = store.delete(path) {
        warn!(file = path, error = %e, "failed to remove partial file");
    }
}
