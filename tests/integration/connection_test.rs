//! Connection integration tests.
//!
//! Tests connection caching, configuration errors and connect failures.

use super::{env_database, mock_database, sqlite_database};
use quarry::config::{ConnectionConfig, DatabaseConfig};
use quarry::database::ConnectionRegistry;
use quarry::db::{Driver, FailingDriver, MockDriver};
use quarry::{Database, QuarryError, Value};
use std::sync::Arc;

#[tokio::test]
async fn test_get_connection_is_cached() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);

    let first = db.get_connection().await.unwrap();
    let second = db.get_connection().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(driver.connect_count(), 1);
    assert!(Arc::ptr_eq(&db.driver().unwrap(), &db.driver().unwrap()));
}

#[tokio::test]
async fn test_clones_share_connections() {
    let db = sqlite_database();
    let other = db.clone();

    db.execute("CREATE TABLE shared (id INTEGER)", vec![])
        .await
        .unwrap();

    assert!(other.table_exists("shared").await.unwrap());
    assert!(Arc::ptr_eq(
        &db.get_connection().await.unwrap(),
        &other.get_connection().await.unwrap()
    ));
}

#[tokio::test]
async fn test_unknown_connection_is_config_error() {
    let db = sqlite_database().connection("reporting");

    let err = db.get_connection().await.err().unwrap();
    assert!(matches!(err, QuarryError::Config(_)));
    assert!(err.to_string().contains("[reporting]"));
}

#[tokio::test]
async fn test_unsupported_driver_is_config_error() {
    let db = Database::from_config(
        DatabaseConfig::default().with_connection("default", ConnectionConfig::new("oracle")),
    );

    let err = db.get_connection().await.err().unwrap();
    assert!(matches!(err, QuarryError::Config(_)));
    assert!(err.to_string().contains("oracle"));
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let config =
        DatabaseConfig::default().with_connection("default", ConnectionConfig::new("mock"));
    let registry = ConnectionRegistry::with_factory(
        config,
        Arc::new(|_: &str, _: &ConnectionConfig| {
            Ok(Arc::new(FailingDriver) as Arc<dyn Driver>)
        }),
    );
    let db = Database::new(Arc::new(registry));

    let err = db.query("SELECT 1", vec![]).await.unwrap_err();
    assert!(matches!(err, QuarryError::Connection(_)));
    assert!(err.to_string().contains("[default]"));
}

#[tokio::test]
async fn test_named_connections_from_toml() {
    let config = DatabaseConfig::from_toml_str(
        r#"
default = "main"

[connections.main]
driver = "sqlite"
database = ":memory:"

[connections.scratch]
driver = "sqlite3"
database = ":memory:"
"#,
    )
    .unwrap();
    let db = Database::from_config(config);
    let scratch = db.connection("scratch");

    assert_eq!(db.connection_name(), "main");
    assert_eq!(scratch.connection_name(), "scratch");

    db.execute("CREATE TABLE only_in_main (id INTEGER)", vec![])
        .await
        .unwrap();

    assert!(db.table_exists("only_in_main").await.unwrap());
    assert!(!scratch.table_exists("only_in_main").await.unwrap());
}

#[tokio::test]
async fn test_postgres_connection() {
    let Some(db) = env_database("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let rows = db.query("SELECT 1 AS one", vec![]).await.unwrap();
    assert_eq!(rows[0]["one"], Value::Int(1));
}

#[tokio::test]
async fn test_mysql_connection() {
    let Some(db) = env_database("MYSQL_URL") else {
        eprintln!("Skipping test: MYSQL_URL not set");
        return;
    };

    let rows = db.query("SELECT 1 AS one", vec![]).await.unwrap();
    assert_eq!(rows[0]["one"], Value::Int(1));
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host() {
    let config = ConnectionConfig {
        host: Some("invalid.host.that.does.not.exist.local".to_string()),
        port: Some(5432),
        database: Some("testdb".to_string()),
        username: Some("testuser".to_string()),
        password: Some("testpass".to_string()),
        connect_timeout: Some(2),
        ..ConnectionConfig::new("pgsql")
    };
    let db = Database::from_config(DatabaseConfig::default().with_connection("default", config));

    let err = db.get_connection().await.err().unwrap();
    assert!(matches!(err, QuarryError::Connection(_)));
    assert!(!err.to_string().contains("testpass"));
}
