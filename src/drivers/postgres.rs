use crate::config::ConnectionConfig;
use crate::config::snapshots::PgsqlUtilities;
use crate::error::Result;
use crate::exec::{OutputTarget, ShellCommand, Substitutions};
use crate::storage::BlobStore;

use super::{CREDENTIALS_FILE, DATABASE, DatabaseDriver, DumpScope, HOST, PORT, USERNAME, remove_secret, write_secret};

const DEFAULT_PORT: u16 = 5432;

const DROP_ALL_TABLES: &str = "DO $$ DECLARE r record; BEGIN \
FOR r IN SELECT tablename FROM pg_tables WHERE schemaname = current_schema() LOOP \
EXECUTE 'DROP TABLE IF EXISTS ' || quote_ident(r.tablename) || ' CASCADE'; \
END LOOP; END $$;";

/// PostgreSQL through pg_dump and psql. The password lives in a pgpass file
/// named by `PGPASSFILE`; host, port and user are passed as flags.
pub struct PostgresDriver {
    pg_dump: String,
    psql: String,
    credentials_file: String,
}

impl PostgresDriver {
    pub fn new(utilities: &PgsqlUtilities, token: &str) -> Self {
        Self {
            pg_dump: utilities.pg_dump.clone(),
            psql: utilities.psql.clone(),
            credentials_file: format!("db-snapshots-pgpass-{}.txt", token),
        }
    }

    fn with_connection(program: &str) -> ShellCommand {
        ShellCommand::new(program)
            .env("PGPASSFILE", CREDENTIALS_FILE)
            .args(["-h", HOST, "-p", PORT, "-U", USERNAME])
    }
}

/// pgpass fields escape `\` and `:` with a backslash.
fn pgpass_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace(':', "\\:")
}

impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn build_dump_command(
        &self,
        output: &str,
        dump_options: &[String],
        tables: &[String],
        ignore_tables: &[String],
        schema_only_tables: &[String],
        database: &str,
    ) -> Vec<ShellCommand> {
        let scope = DumpScope::new(tables, ignore_tables, schema_only_tables);
        let mut commands = Vec::new();

        if !scope.skip_data_pass {
            let mut cmd = Self::with_connection(&self.pg_dump)
                .args(dump_options.iter().cloned())
                .args(scope.excluded.iter().map(|t| format!("--exclude-table={}", t)));
            for table in &scope.data_tables {
                cmd = cmd.arg("-t").arg(table);
            }
            commands.push(cmd.arg(database).stdout_to(OutputTarget::Truncate(output.to_string())));
        }

        if !scope.schema_only.is_empty() {
            let target = if commands.is_empty() {
                OutputTarget::Truncate(output.to_string())
            } else {
                OutputTarget::Append(output.to_string())
            };
            let mut cmd = Self::with_connection(&self.pg_dump)
                .arg("--schema-only")
                .args(dump_options.iter().cloned());
            for table in &scope.schema_only {
                cmd = cmd.arg("-t").arg(table);
            }
            commands.push(cmd.arg(database).stdout_to(target));
        }

        commands
    }

    fn build_load_command(&self, input: &str, database: &str) -> ShellCommand {
        Self::with_connection(&self.psql)
            .args(["-v", "ON_ERROR_STOP=1"])
            .arg(database)
            .stdin_from(input)
    }

    fn build_statement_command(&self, sql: &str, database: &str) -> ShellCommand {
        Self::with_connection(&self.psql)
            .args(["-v", "ON_ERROR_STOP=1"])
            .arg(database)
            .arg("-c")
            .arg(sql)
    }

    fn drop_all_tables_sql(&self) -> &'static str {
        DROP_ALL_TABLES
    }

    fn write_credentials(&self, connection: &ConnectionConfig, store: &dyn BlobStore) -> Result<Substitutions> {
        let host = connection.effective_host().to_string();
        let port = connection.port.unwrap_or(DEFAULT_PORT).to_string();

        // hostname:port:database:username:password
        let contents = [
            host.as_str(),
            port.as_str(),
            connection.database.as_str(),
            connection.username.as_str(),
            connection.password.as_str(),
        ]
        .iter()
        .map(|f| pgpass_field(f))
        .collect::<Vec<_>>()
        .join(":");

        let path = write_secret(store, &self.credentials_file, &contents)?;

        let mut subs = Substitutions::new();
        subs.insert(CREDENTIALS_FILE, path);
        subs.insert(DATABASE, connection.database.clone());
        subs.insert(HOST, host);
        subs.insert(PORT, port);
        subs.insert(USERNAME, connection.username.clone());
        Ok(subs)
    }

    fn cleanup_credentials(&self, store: &dyn BlobStore) {
        remove_secret(store, &self.credentials_file);
    }

    fn utilities(&self) -> Vec<String> {
        vec![self.pg_dump.clone(), self.psql.clone()]
    }

    fn credentials_file(&self) -> &str {
        &self.credentials_file
    }
}
