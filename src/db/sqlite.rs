//! SQLite driver implementation.
//!
//! SQLite has no stored procedures: `call_procedure` runs its "procedure
//! name" as arbitrary SQL inside a savepoint.

use super::connection::collect_sets;
use super::driver::{named_column, outputs_from_first_row};
use super::{
    Connection, Driver, DriverKind, Expression, OutputParams, ProcedureOutput, Row, Value,
};
use crate::config::{ConnectionConfig, SQLITE_MEMORY};
use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
};
use sqlx::{Column as SqlxColumn, ConnectOptions, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Internal table holding AUTOINCREMENT counters.
const SEQUENCE_TABLE: &str = "sqlite_sequence";

/// Savepoint wrapping a procedure call.
const PROCEDURE_SAVEPOINT: &str = "quarry_procedure";

const BUSY_TIMEOUT_SECS: u64 = 5;

/// SQLite driver.
#[derive(Debug, Default, Clone)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }

    /// Builds connect options, creating the database file's directory if needed.
    pub fn connect_options(config: &ConnectionConfig) -> Result<SqliteConnectOptions> {
        let database = config.database.as_deref().unwrap_or(SQLITE_MEMORY);

        let mut options = if database == SQLITE_MEMORY {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            let path = Path::new(database);
            ensure_parent_dirs(path)?;
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        options = options
            .foreign_keys(config.option_bool("foreign_keys").unwrap_or(true))
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));

        for key in config.options.keys() {
            match key.as_str() {
                "foreign_keys" => {}
                "journal_mode" => {
                    if let Some(mode) = config.option_str(key) {
                        options = options.journal_mode(SqliteJournalMode::from_str(&mode)?);
                    }
                }
                "busy_timeout" => {
                    if let Some(secs) = config.option_str(key).and_then(|s| s.parse().ok()) {
                        options = options.busy_timeout(Duration::from_secs(secs));
                    }
                }
                other => warn!("Ignoring unknown SQLite option '{other}'"),
            }
        }

        Ok(options)
    }
}

/// Ensures parent directories exist for the database path.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Backend(sqlx::Error::Io(e)))?;
            debug!("Created database directory {}", parent.display());
        }
    }
    Ok(())
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let options = Self::connect_options(config)?;
        let conn = options.connect().await?;

        debug!("Opened SQLite database {}", config.display_string());
        Ok(Box::new(SqliteHandle { conn }))
    }

    fn sequence_table(&self) -> Option<&'static str> {
        Some(SEQUENCE_TABLE)
    }

    async fn get_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>> {
        let rows = conn
            .fetch_all(&Expression::raw(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            ))
            .await?;
        Ok(named_column(&rows, "name"))
    }

    async fn get_table_columns(
        &self,
        conn: &mut dyn Connection,
        table: &str,
    ) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", self.quote_identifier(table));
        let rows = conn.fetch_all(&Expression::raw(sql)).await?;
        Ok(named_column(&rows, "name"))
    }

    async fn call_procedure(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        params: &[Value],
        outputs: &OutputParams,
    ) -> Result<ProcedureOutput> {
        conn.execute_unprepared(&format!("SAVEPOINT {PROCEDURE_SAVEPOINT}"))
            .await?;

        let query = Expression::new(name, params.to_vec());
        match conn.fetch_sets(&query).await {
            Ok(sets) => {
                conn.execute_unprepared(&format!("RELEASE SAVEPOINT {PROCEDURE_SAVEPOINT}"))
                    .await?;
                let outputs = outputs_from_first_row(&sets, outputs);
                Ok(ProcedureOutput { sets, outputs })
            }
            Err(e) => {
                let rollback = format!(
                    "ROLLBACK TO SAVEPOINT {PROCEDURE_SAVEPOINT}; \
                     RELEASE SAVEPOINT {PROCEDURE_SAVEPOINT}"
                );
                if let Err(rollback_error) = conn.execute_unprepared(&rollback).await {
                    warn!("Failed to roll back procedure savepoint: {rollback_error}");
                }
                Err(e)
            }
        }
    }

    async fn disable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("PRAGMA foreign_keys = OFF").await?;
        Ok(())
    }

    async fn enable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        Ok(())
    }

    async fn truncate(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        reset_auto_increment: bool,
    ) -> Result<u64> {
        let deleted = self.delete_all(conn, table).await?;

        if reset_auto_increment && self.table_exists(conn, SEQUENCE_TABLE).await {
            conn.execute(&Expression::new(
                format!("DELETE FROM {SEQUENCE_TABLE} WHERE name = ?"),
                vec![Value::from(table)],
            ))
            .await?;
        }

        Ok(deleted)
    }
}

/// An open SQLite connection.
pub struct SqliteHandle {
    conn: SqliteConnection,
}

#[async_trait]
impl Connection for SqliteHandle {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn execute(&mut self, query: &Expression) -> Result<u64> {
        let result = build_query(query).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::Executor::execute(&mut self.conn, sql).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, query: &Expression) -> Result<Vec<Row>> {
        let rows = build_query(query).fetch_all(&mut self.conn).await?;
        Ok(rows.iter().map(convert_row).collect())
    }

    // `fetch_many` is deprecated but is the only sqlx API that reports
    // result set boundaries.
    #[allow(deprecated)]
    async fn fetch_sets(&mut self, query: &Expression) -> Result<Vec<Vec<Row>>> {
        collect_sets(build_query(query).fetch_many(&mut self.conn), convert_row).await
    }

    fn fetch_stream<'a>(&'a mut self, query: &'a Expression) -> BoxStream<'a, Result<Row>> {
        build_query(query)
            .fetch(&mut self.conn)
            .map(|row| row.map(|row| convert_row(&row)).map_err(QuarryError::from))
            .boxed()
    }
}

fn build_query(query: &Expression) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    query
        .bindings()
        .iter()
        .fold(sqlx::query(query.sql()), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
    }
}

/// Converts a sqlx SqliteRow to our Row type.
fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), convert_value(row, col.ordinal())))
        .collect()
}

/// Converts a single column value using the storage class of the value
/// itself, since SQLite columns are dynamically typed.
fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "BOOLEAN" => row
            .try_get_unchecked::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        "NUMERIC" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::Int)
            .or_else(|_| row.try_get_unchecked::<f64, _>(index).map(Value::Float))
            .unwrap_or(Value::Null),

        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
