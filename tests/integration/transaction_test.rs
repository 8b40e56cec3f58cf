//! Transaction integration tests.
//!
//! Tests nesting through savepoints, retries and rollback on SQLite.

use super::{env_database, mock_database, sqlite_database};
use pretty_assertions::assert_eq;
use quarry::db::MockDriver;
use quarry::{QuarryError, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_nested_begin_commit_issues_one_real_transaction() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);
    let log = driver.log();

    db.begin_transaction().await.unwrap();
    db.begin_transaction().await.unwrap();
    assert_eq!(log.statements(), vec!["BEGIN", "SAVEPOINT trans2"]);
    assert_eq!(db.transaction_level(), 2);

    db.commit().await.unwrap();
    assert_eq!(log.count("COMMIT"), 0);
    assert_eq!(db.transaction_level(), 1);

    db.commit().await.unwrap();
    assert_eq!(log.count("COMMIT"), 1);
    assert_eq!(db.transaction_level(), 0);

    db.commit().await.unwrap();
    assert_eq!(log.count("COMMIT"), 1);
    assert_eq!(db.transaction_level(), 0);

    assert_eq!(log.count("BEGIN"), 1);
    assert_eq!(log.count("SAVEPOINT trans2"), 1);
}

#[tokio::test]
async fn test_rollback_outside_transaction_is_noop() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);

    db.rollback().await.unwrap();

    assert_eq!(db.transaction_level(), 0);
    assert!(driver.log().statements().is_empty());
}

#[tokio::test]
async fn test_transaction_retries_until_success() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);
    let calls = Arc::new(AtomicU32::new(0));

    let result = db
        .transaction(
            |_tx| {
                let calls = Arc::clone(&calls);
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if call < 3 {
                        anyhow::bail!("attempt {call} failed");
                    }
                    Ok::<_, anyhow::Error>(call * 10)
                }
            },
            3,
        )
        .await
        .unwrap();

    let log = driver.log();
    assert_eq!(result, 30);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(log.count("BEGIN"), 3);
    assert_eq!(log.count("ROLLBACK"), 2);
    assert_eq!(log.count("COMMIT"), 1);
    assert_eq!(db.transaction_level(), 0);
}

#[tokio::test]
async fn test_transaction_returns_original_error_after_last_attempt() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);

    let err = db
        .transaction(
            |_tx| async move { Err::<(), _>(anyhow::anyhow!("constraint violated")) },
            2,
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "constraint violated");
    assert_eq!(driver.log().count("ROLLBACK"), 2);
    assert_eq!(db.transaction_level(), 0);
}

#[tokio::test]
async fn test_failed_rollback_keeps_callback_error() {
    let driver = MockDriver::new().fail_on("ROLLBACK");
    let db = mock_database(&driver);

    let err = db
        .transaction(
            |_tx| async move { Err::<(), _>(QuarryError::internal("callback failed")) },
            1,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::Internal(ref msg) if msg == "callback failed"));
    assert_eq!(db.transaction_level(), 0);
}

#[tokio::test]
async fn test_nested_transaction_uses_savepoint() {
    let driver = MockDriver::new();
    let db = mock_database(&driver);

    db.transaction(
        |tx| async move {
            tx.transaction(|_inner| async move { Ok::<_, QuarryError>(()) }, 1)
                .await
        },
        1,
    )
    .await
    .unwrap();

    assert_eq!(
        driver.log().statements(),
        vec!["BEGIN", "SAVEPOINT trans2", "COMMIT"]
    );
}

#[tokio::test]
async fn test_failed_transaction_rolls_back_rows() {
    let db = sqlite_database();
    db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", vec![])
        .await
        .unwrap();

    let result = db
        .transaction(
            |tx| async move {
                tx.execute("INSERT INTO t (name) VALUES (?)", vec![Value::from("a")])
                    .await?;
                tx.execute("INSERT INTO t (name) VALUES (?)", vec![Value::from("b")])
                    .await?;
                Err::<(), anyhow::Error>(anyhow::anyhow!("abort after inserts"))
            },
            1,
        )
        .await;

    assert!(result.is_err());
    assert_eq!(db.get_tables().await.unwrap(), vec!["t"]);
    let rows = db.query("SELECT COUNT(*) AS n FROM t", vec![]).await.unwrap();
    assert_eq!(rows[0]["n"], Value::Int(0));
}

#[tokio::test]
async fn test_inner_failure_rolls_back_to_savepoint() {
    let db = sqlite_database();
    db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", vec![])
        .await
        .unwrap();

    db.transaction(
        |tx| async move {
            tx.execute("INSERT INTO t (name) VALUES ('outer')", vec![])
                .await?;

            let inner = tx
                .transaction(
                    |inner| async move {
                        inner
                            .execute("INSERT INTO t (name) VALUES ('inner')", vec![])
                            .await?;
                        Err::<(), _>(QuarryError::internal("inner failed"))
                    },
                    1,
                )
                .await;
            assert!(inner.is_err());
            assert_eq!(tx.transaction_level(), 1);

            Ok::<_, QuarryError>(())
        },
        1,
    )
    .await
    .unwrap();

    let rows = db.query("SELECT name FROM t", vec![]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], Value::from("outer"));
    assert_eq!(db.transaction_level(), 0);
}

#[tokio::test]
async fn test_failed_commit_leaves_connection_reusable() {
    let driver = MockDriver::new().fail_on("COMMIT");
    let db = mock_database(&driver);

    let result = db
        .transaction(|_tx| async move { Ok::<_, anyhow::Error>(1) }, 1)
        .await;

    assert!(result.is_err());
    assert_eq!(db.transaction_level(), 0);
    assert_eq!(driver.log().count("ROLLBACK"), 1);

    db.begin_transaction().await.unwrap();
    assert_eq!(driver.log().statements().last().map(String::as_str), Some("BEGIN"));
    assert_eq!(db.transaction_level(), 1);
}

#[tokio::test]
async fn test_postgres_table_lookup_inside_transaction() {
    let Some(db) = env_database("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    db.execute(
        "CREATE TABLE IF NOT EXISTS quarry_lookup_target (id SERIAL PRIMARY KEY)",
        vec![],
    )
    .await
    .unwrap();

    let inserted = db
        .transaction(
            |tx| async move {
                assert!(!tx.table_exists("nonexistent_table").await?);
                let n = tx
                    .execute("INSERT INTO quarry_lookup_target DEFAULT VALUES", vec![])
                    .await?;
                Err::<u64, _>(QuarryError::internal(format!("undo {n} insert")))
            },
            1,
        )
        .await;

    assert!(matches!(inserted, Err(QuarryError::Internal(ref msg)) if msg == "undo 1 insert"));
    db.drop_table("quarry_lookup_target").await.unwrap();
}
