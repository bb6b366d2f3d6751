use crate::config::ConnectionConfig;
use crate::config::snapshots::MysqlUtilities;
use crate::error::Result;
use crate::exec::{OutputTarget, ShellCommand, Substitutions};
use crate::storage::BlobStore;

use super::{CREDENTIALS_FILE, DATABASE, DatabaseDriver, DumpScope, remove_secret, write_secret};

const DEFAULT_PORT: u16 = 3306;

/// Builds one `DROP TABLE` over every base table of the current schema, with
/// foreign key checks off for the session.
const DROP_ALL_TABLES: &str = "SET FOREIGN_KEY_CHECKS=0; \
SET SESSION group_concat_max_len = 1048576; \
SET @tables = NULL; \
SELECT GROUP_CONCAT('`', table_name, '`') INTO @tables FROM information_schema.tables \
WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'; \
SET @stmt = IF(@tables IS NULL, 'DO 0', CONCAT('DROP TABLE ', @tables)); \
PREPARE drop_stmt FROM @stmt; EXECUTE drop_stmt; DEALLOCATE PREPARE drop_stmt; \
SET FOREIGN_KEY_CHECKS=1;";

/// MySQL and MariaDB, through mysqldump and the mysql client. Credentials go
/// in a `[client]` option file passed with `--defaults-extra-file`.
pub struct MySqlDriver {
    mysqldump: String,
    mysql: String,
    credentials_file: String,
}

impl MySqlDriver {
    pub fn new(utilities: &MysqlUtilities, token: &str) -> Self {
        Self {
            mysqldump: utilities.mysqldump.clone(),
            mysql: utilities.mysql.clone(),
            credentials_file: format!("db-snapshots-mysql-credentials-{}.txt", token),
        }
    }

    fn dump_base(&self, dump_options: &[String]) -> ShellCommand {
        ShellCommand::new(&self.mysqldump)
            .arg(format!("--defaults-extra-file={}", CREDENTIALS_FILE))
            .args(dump_options.iter().cloned())
    }
}

/// Single-quoted option file value; `\\` and `'` are backslash-escaped.
fn option_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl DatabaseDriver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
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
            let cmd = self
                .dump_base(dump_options)
                .args(scope.excluded.iter().map(|t| format!("--ignore-table={}.{}", database, t)))
                .arg(database)
                .args(scope.data_tables.iter().cloned())
                .stdout_to(OutputTarget::Truncate(output.to_string()));
            commands.push(cmd);
        }

        if !scope.schema_only.is_empty() {
            let target = if commands.is_empty() {
                OutputTarget::Truncate(output.to_string())
            } else {
                OutputTarget::Append(output.to_string())
            };
            let cmd = self
                .dump_base(dump_options)
                .arg("--no-data")
                .arg(database)
                .args(scope.schema_only.iter().cloned())
                .stdout_to(target);
            commands.push(cmd);
        }

        commands
    }

    fn build_load_command(&self, input: &str, database: &str) -> ShellCommand {
        ShellCommand::new(&self.mysql)
            .arg(format!("--defaults-extra-file={}", CREDENTIALS_FILE))
            .arg(database)
            .stdin_from(input)
    }

    fn build_statement_command(&self, sql: &str, database: &str) -> ShellCommand {
        ShellCommand::new(&self.mysql)
            .arg(format!("--defaults-extra-file={}", CREDENTIALS_FILE))
            .arg(database)
            .arg("-e")
            .arg(sql)
    }

    fn drop_all_tables_sql(&self) -> &'static str {
        DROP_ALL_TABLES
    }

    fn write_credentials(&self, connection: &ConnectionConfig, store: &dyn BlobStore) -> Result<Substitutions> {
        let port = connection.port.unwrap_or(DEFAULT_PORT);
        let contents = [
            "[client]".to_string(),
            format!("user={}", option_value(&connection.username)),
            format!("password={}", option_value(&connection.password)),
            format!("host={}", option_value(connection.effective_host())),
            format!("port={}", option_value(&port.to_string())),
        ]
        .join("\n");

        let path = write_secret(store, &self.credentials_file, &contents)?;

        let mut subs = Substitutions::new();
        subs.insert(CREDENTIALS_FILE, path);
        subs.insert(DATABASE, connection.database.clone());
        Ok(subs)
    }

    fn cleanup_credentials(&self, store: &dyn BlobStore) {
        remove_secret(store, &self.credentials_file);
    }

    fn utilities(&self) -> Vec<String> {
        vec![self.mysqldump.clone(), self.mysql.clone()]
    }

    fn credentials_file(&self) -> &str {
        &self.credentials_file
    }
}
