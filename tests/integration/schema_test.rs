//! Schema integration tests.
//!
//! Tests introspection, truncation and table dropping.

use super::{env_database, mock_database, sqlite_database};
use pretty_assertions::assert_eq;
use quarry::db::MockDriver;
use quarry::{Database, Value};

async fn create_shop(db: &Database) {
    db.execute(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        vec![],
    )
    .await
    .unwrap();
    db.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         customer_id INTEGER NOT NULL REFERENCES customers (id), total REAL)",
        vec![],
    )
    .await
    .unwrap();
    db.execute("INSERT INTO customers (name) VALUES ('ada'), ('grace')", vec![])
        .await
        .unwrap();
    db.execute(
        "INSERT INTO orders (customer_id, total) VALUES (1, 10.0), (2, 20.0)",
        vec![],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_introspection() {
    let db = sqlite_database();
    create_shop(&db).await;

    assert_eq!(db.get_tables().await.unwrap(), vec!["customers", "orders"]);
    assert_eq!(
        db.get_table_columns("orders").await.unwrap(),
        vec!["id", "customer_id", "total"]
    );
    assert!(db.table_exists("orders").await.unwrap());
}

#[tokio::test]
async fn test_table_exists_is_false_for_missing_table() {
    let db = sqlite_database();
    assert!(!db.table_exists("nonexistent_table").await.unwrap());
}

#[tokio::test]
async fn test_truncate_keeps_or_resets_counter() {
    let db = sqlite_database();
    create_shop(&db).await;
    db.disable_foreign_key_constraints().await.unwrap();

    db.truncate("orders", false).await.unwrap();
    db.execute("INSERT INTO orders (customer_id) VALUES (1)", vec![])
        .await
        .unwrap();
    let rows = db.query("SELECT id FROM orders", vec![]).await.unwrap();
    assert_eq!(rows[0]["id"], Value::Int(3));

    db.truncate("orders", true).await.unwrap();
    db.execute("INSERT INTO orders (customer_id) VALUES (1)", vec![])
        .await
        .unwrap();
    let rows = db.query("SELECT id FROM orders", vec![]).await.unwrap();
    assert_eq!(rows[0]["id"], Value::Int(1));

    db.enable_foreign_key_constraints().await.unwrap();
}

#[tokio::test]
async fn test_drop_and_delete_single_table() {
    let db = sqlite_database();
    create_shop(&db).await;

    assert_eq!(db.delete_all("orders").await.unwrap(), 2);
    db.drop_table("orders").await.unwrap();

    assert!(!db.table_exists("orders").await.unwrap());
    assert_eq!(db.get_tables().await.unwrap(), vec!["customers"]);
}

#[tokio::test]
async fn test_drop_all_tables() {
    let db = sqlite_database();
    create_shop(&db).await;

    let dropped = db.drop_all_tables().await.unwrap();

    assert_eq!(dropped, 2);
    assert!(db.get_tables().await.unwrap().is_empty());
    let rows = db.query("PRAGMA foreign_keys", vec![]).await.unwrap();
    assert_eq!(rows[0]["foreign_keys"], Value::Int(1));
}

#[tokio::test]
async fn test_drop_all_tables_reenables_constraints_after_failure() {
    let driver = MockDriver::new()
        .with_tables(["customers", "orders"])
        .fail_on("DROP TABLE");
    let db = mock_database(&driver);

    assert!(db.drop_all_tables().await.is_err());

    let statements = driver.log().statements();
    assert_eq!(
        statements,
        vec![
            "PRAGMA foreign_keys = OFF",
            "DROP TABLE IF EXISTS \"customers\"",
            "PRAGMA foreign_keys = ON",
        ]
    );
}

#[tokio::test]
async fn test_postgres_table_exists() {
    let Some(db) = env_database("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    assert!(!db.table_exists("nonexistent_table").await.unwrap());
}

#[tokio::test]
async fn test_mysql_table_exists() {
    let Some(db) = env_database("MYSQL_URL") else {
        eprintln!("Skipping test: MYSQL_URL not set");
        return;
    };

    assert!(!db.table_exists("nonexistent_table").await.unwrap());
}
