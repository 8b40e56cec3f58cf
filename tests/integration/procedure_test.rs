//! Procedure integration tests.
//!
//! Tests procedure calls through the façade and the result accessors.

use super::{env_database, mock_database, sqlite_database};
use pretty_assertions::assert_eq;
use quarry::db::{row, MockDriver};
use quarry::{ProcedureResult, Value};

#[test]
fn test_result_accessors() {
    let result = ProcedureResult::new(vec![
        vec![row([("id", Value::Int(1)), ("name", Value::from("a"))])],
        vec![row([("ok", true)])],
    ]);

    let expected = row([("id", Value::Int(1)), ("name", Value::from("a"))]);
    assert_eq!(result.first(), expected);
    assert_eq!(result.result_set(1), vec![row([("ok", true)])].as_slice());
    assert_eq!(result.last_set(0), Some(&expected));
}

#[test]
fn test_cursor_write_lands_in_set_zero_row_zero() {
    let mut result = ProcedureResult::new(vec![vec![row([("id", 1)])]]);

    result["foo"] = Value::from("bar");

    assert_eq!(result.result_set(0)[0]["foo"], Value::from("bar"));
    assert_eq!(result.result_set(0)[0]["id"], Value::Int(1));
}

#[tokio::test]
async fn test_procedure_drains_every_set() {
    let driver = MockDriver::new().with_result_sets(vec![
        vec![row([("id", 1)]), row([("id", 2)])],
        vec![row([("total", 2)])],
    ]);
    let db = mock_database(&driver);

    let result = db
        .procedure("order_summary", vec![Value::Int(5)], &[])
        .await
        .unwrap();

    assert_eq!(result.set_count(), 2);
    assert_eq!(result.all().len(), 2);
    assert_eq!(result.last(), row([("id", 2)]));
    assert_eq!(result.last_set(1), Some(&row([("total", 2)])));
    assert_eq!(driver.log().statements(), vec!["CALL order_summary(?)"]);
}

#[tokio::test]
async fn test_sqlite_procedure_returns_outputs() {
    let db = sqlite_database();
    db.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT NOT NULL)",
        vec![],
    )
    .await
    .unwrap();

    let result = db
        .procedure(
            "INSERT INTO orders (customer) VALUES (?) RETURNING id AS order_id, customer",
            vec![Value::from("ada")],
            &[("order_id", Value::Null)],
        )
        .await
        .unwrap();

    assert_eq!(result.output("order_id"), Some(&Value::Int(1)));
    assert_eq!(result["customer"], Value::from("ada"));
}

#[tokio::test]
async fn test_sqlite_procedure_failure_rolls_back() {
    let db = sqlite_database();
    db.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT NOT NULL)",
        vec![],
    )
    .await
    .unwrap();

    let result = db
        .procedure(
            "INSERT INTO orders (customer) VALUES ('ada'); \
             INSERT INTO orders (customer) VALUES (NULL)",
            vec![],
            &[],
        )
        .await;

    assert!(result.is_err());
    let rows = db
        .query("SELECT COUNT(*) AS n FROM orders", vec![])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], Value::Int(0));
}

#[tokio::test]
async fn test_sqlite_procedure_keeps_empty_set_position() {
    let db = sqlite_database();
    db.execute("CREATE TABLE events (id INTEGER PRIMARY KEY)", vec![])
        .await
        .unwrap();

    let result = db
        .procedure("SELECT id FROM events; SELECT 7 AS summary", vec![], &[])
        .await
        .unwrap();

    assert_eq!(result.set_count(), 2);
    assert!(result.result_set(0).is_empty());
    assert_eq!(result.result_set(1), vec![row([("summary", 7)])].as_slice());
    assert_eq!(result.last_set(0), None);
    assert_eq!(result.last_set(1), Some(&row([("summary", 7)])));
}

#[tokio::test]
async fn test_postgres_function_call() {
    let Some(db) = env_database("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = db.procedure("abs", vec![Value::Int(-4)], &[]).await.unwrap();
    assert_eq!(result["abs"], Value::Int(4));
}
