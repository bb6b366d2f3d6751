use std::collections::BTreeSet;

use tracing::warn;

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::exec::{ShellCommand, Substitutions};
use crate::storage::BlobStore;

pub mod mysql;
pub mod postgres;
pub mod selector;

pub const CREDENTIALS_FILE: &str = "{credentials_file}";
pub const DATABASE: &str = "{database}";
pub const HOST: &str = "{host}";
pub const PORT: &str = "{port}";
pub const USERNAME: &str = "{username}";

/// Engine-specific dump, restore and credential handling.
pub trait DatabaseDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Commands that together write a full dump to `output`, in order.
    fn build_dump_command(
        &self,
        output: &str,
        dump_options: &[String],
        tables: &[String],
        ignore_tables: &[String],
        schema_only_tables: &[String],
        database: &str,
    ) -> Vec<ShellCommand>;

    /// Restore a plain (decompressed) dump from `input`.
    fn build_load_command(&self, input: &str, database: &str) -> ShellCommand;

    /// Run a single SQL statement against `database`.
    fn build_statement_command(&self, sql: &str, database: &str) -> ShellCommand;

    /// SQL that drops every table of the connected database.
    fn drop_all_tables_sql(&self) -> &'static str;

    /// Empty `database` before a restore.
    fn build_drop_tables_command(&self, database: &str) -> ShellCommand {
        self.build_statement_command(self.drop_all_tables_sql(), database)
    }

    /// Write the secret file into `store` and return placeholder values for
    /// the commands built above.
    fn write_credentials(&self, connection: &ConnectionConfig, store: &dyn BlobStore) -> Result<Substitutions>;

    /// Remove the secret file. Safe to call when it was never written.
    fn cleanup_credentials(&self, store: &dyn BlobStore);

    /// Executables the commands above invoke.
    fn utilities(&self) -> Vec<String>;

    /// Store-relative name of the secret file.
    fn credentials_file(&self) -> &str;
}

/// Table selection shared by every engine.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DumpScope {
    /// Tables dumped with data; empty means the whole database.
    pub data_tables: Vec<String>,
    /// Tables left out of the data pass.
    pub excluded: Vec<String>,
    /// Tables dumped without rows in a second pass.
    pub schema_only: Vec<String>,
    /// Every selected table is schema-only, so the data pass is skipped.
    pub skip_data_pass: bool,
}

impl DumpScope {
    pub fn new(tables: &[String], ignore_tables: &[String], schema_only_tables: &[String]) -> Self {
        if tables.is_empty() {
            let mut excluded: Vec<String> = ignore_tables.to_vec();
            excluded.extend(schema_only_tables.iter().cloned());
            return Self {
                data_tables: Vec::new(),
                excluded,
                schema_only: schema_only_tables.to_vec(),
                skip_data_pass: false,
            };
        }

        let schema: BTreeSet<&String> = schema_only_tables.iter().collect();
        let data_tables: Vec<String> = tables.iter().filter(|t| !schema.contains(t)).cloned().collect();
        Self {
            skip_data_pass: data_tables.is_empty(),
            data_tables,
            excluded: Vec::new(),
            schema_only: schema_only_tables.to_vec(),
        }
    }
}

/// Write a secret readable by the owner only.
pub(crate) fn write_secret(store: &dyn BlobStore, name: &str, contents: &str) -> Result<String> {
    store.put(name, b"")?;
    let path = store.local_path(name);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    store.put(name, contents.as_bytes())?;
    Ok(path.to_string_lossy().to_string())
}

pub(crate) fn remove_secret(store: &dyn BlobStore, name: &str) {
    if let Err(e) = store.delete(name) {
        warn!(file = name, error = %e, "failed to remove credentials file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scope_whole_database_excludes_ignored_and_schema_only() {
        let scope = DumpScope::new(&[], &names(&["logs"]), &names(&["failed_jobs"]));
        assert!(scope.data_tables.is_empty());
        assert_eq!(scope.excluded, names(&["logs", "failed_jobs"]));
        assert_eq!(scope.schema_only, names(&["failed_jobs"]));
        assert!(!scope.skip_data_pass);
    }

    #[test]
    fn test_scope_tables_minus_schema_only() {
        let scope = DumpScope::new(&names(&["a", "b", "c"]), &[], &names(&["b"]));
        assert_eq!(scope.data_tables, names(&["a", "c"]));
        assert!(scope.excluded.is_empty());
        assert_eq!(scope.schema_only, names(&["b"]));
    }

    #[test]
    fn test_scope_all_tables_schema_only() {
        let scope = DumpScope::new(&names(&["a"]), &[], &names(&["a"]));
        assert!(scope.skip_data_pass);
    }
}
