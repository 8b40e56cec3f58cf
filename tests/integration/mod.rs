//! Integration tests for quarry.

pub mod connection_test;
pub mod procedure_test;
pub mod schema_test;
pub mod transaction_test;

use quarry::config::{ConnectionConfig, DatabaseConfig};
use quarry::database::ConnectionRegistry;
use quarry::db::{Driver, MockDriver};
use quarry::Database;
use std::sync::Arc;

/// A database whose default connection is a fresh in-memory SQLite database.
pub fn sqlite_database() -> Database {
    Database::from_config(
        DatabaseConfig::default().with_connection("default", ConnectionConfig::sqlite_memory()),
    )
}

/// A database whose every connection is opened by `driver`.
pub fn mock_database(driver: &MockDriver) -> Database {
    let driver = driver.clone();
    let config =
        DatabaseConfig::default().with_connection("default", ConnectionConfig::new("mock"));
    let registry = ConnectionRegistry::with_factory(
        config,
        Arc::new(move |_: &str, _: &ConnectionConfig| {
            Ok(Arc::new(driver.clone()) as Arc<dyn Driver>)
        }),
    );
    Database::new(Arc::new(registry))
}

/// A database connected through the URL in environment variable `var`.
pub fn env_database(var: &str) -> Option<Database> {
    let url = std::env::var(var).ok()?;
    let connection = ConnectionConfig::from_connection_string(&url).ok()?;
    Some(Database::from_config(
        DatabaseConfig::default().with_connection("default", connection),
    ))
}
