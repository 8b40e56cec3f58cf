//! Database abstraction layer for quarry.
//!
//! Provides a trait-based interface over the supported backends: a
//! [`Connection`] executes statements, a [`Driver`] knows a backend's
//! dialect and how to open connections. [`connect_driver`] picks the
//! driver for a connection's configuration.

mod connection;
mod driver;
mod expression;
mod mock;
mod mysql;
mod postgres;
mod sqlite;
mod types;

pub use connection::{Connection, ConnectionHandle};
pub use driver::{Driver, OutputParams, ProcedureOutput};
pub use expression::Expression;
pub use mock::{FailingDriver, MockDriver, StatementLog};
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use types::{row, Row, Value};

pub(crate) use postgres::describe_error;

use crate::config::ConnectionConfig;
use crate::error::{QuarryError, Result};
use std::sync::Arc;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Mysql,
    Pgsql,
    Sqlite,
}

impl DriverKind {
    /// Returns the backend as it is written in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Pgsql => "pgsql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a configuration `driver` value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::Mysql),
            "pgsql" | "postgres" | "postgresql" => Some(Self::Pgsql),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend (0 for file-based SQLite).
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mysql => 3306,
            Self::Pgsql => 5432,
            Self::Sqlite => 0,
        }
    }
}

/// Resolves the driver for a named connection's configuration.
pub type DriverFactory =
    Arc<dyn Fn(&str, &ConnectionConfig) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// Creates the driver matching `config.driver`.
///
/// This is the central factory used by the connection registry unless a
/// custom [`DriverFactory`] is supplied.
pub fn connect_driver(name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Driver>> {
    let kind = DriverKind::parse(&config.driver).ok_or_else(|| {
        QuarryError::config(format!(
            "Unsupported driver '{}' for connection [{name}]",
            config.driver
        ))
    })?;

    Ok(match kind {
        DriverKind::Mysql => Arc::new(MySqlDriver::new()),
        DriverKind::Pgsql => Arc::new(PostgresDriver::new(config)),
        DriverKind::Sqlite => Arc::new(SqliteDriver::new()),
    })
}

/// The default factory, wrapping [`connect_driver`].
pub fn default_driver_factory() -> DriverFactory {
    Arc::new(connect_driver)
}
