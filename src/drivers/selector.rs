use std::sync::Arc;

use super::{DatabaseDriver, mysql::MySqlDriver, postgres::PostgresDriver};
use crate::config::{ConnectionConfig, UtilitiesConfig};
use crate::error::{Result, SnapshotError};

/// The engines a connection may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    MySql,
    Postgres,
}

impl DriverKind {
    pub fn from_engine(engine: &str) -> Result<Self> {
        match engine.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DriverKind::MySql),
            "pgsql" | "postgres" | "postgresql" => Ok(DriverKind::Postgres),
            other => Err(SnapshotError::config(format!("Unsupported database driver: {}", other))),
        }
    }
}

pub fn select_driver(
    connection: &ConnectionConfig,
    utilities: &UtilitiesConfig,
    token: &str,
) -> Result<Arc<dyn DatabaseDriver>> {
    let driver: Arc<dyn DatabaseDriver> = match DriverKind::from_engine(&connection.driver)? {
        DriverKind::MySql => Arc::new(MySqlDriver::new(&utilities.mysql, token)),
        DriverKind::Postgres => Arc::new(PostgresDriver::new(&utilities.pgsql, token)),
    };
    Ok(driver)
}
