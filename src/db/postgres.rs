//! PostgreSQL driver implementation.
//!
//! Provides the `PostgresDriver` struct implementing the `Driver` trait for
//! PostgreSQL databases using sqlx. PostgreSQL procedures are modelled as
//! SQL functions invoked with `SELECT`.

use super::connection::collect_sets;
use super::driver::{named_column, outputs_from_first_row};
use super::{
    Connection, Driver, DriverKind, Expression, OutputParams, ProcedureOutput, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, ConnectOptions, Postgres, Row as SqlxRow, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Schema introspected when no search path is configured.
const DEFAULT_SCHEMA: &str = "public";

/// Connect timeout used when the config does not set one.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL driver.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    schema: String,
}

impl PostgresDriver {
    /// Creates a driver that introspects the first schema of the
    /// configured search path (or `public`).
    pub fn new(config: &ConnectionConfig) -> Self {
        let schema = config
            .search_path
            .as_deref()
            .and_then(|path| path.split(',').next())
            .map(|schema| schema.trim().trim_matches('"').to_string())
            .filter(|schema| !schema.is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        Self { schema }
    }

    /// The schema used by table introspection.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Builds connect options from the connection config.
    pub fn connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .host(config.host.as_deref().unwrap_or("localhost"))
            .port(config.port.unwrap_or(DriverKind::Pgsql.default_port()));

        if let Some(database) = &config.database {
            options = options.database(database);
        }
        if let Some(username) = &config.username {
            options = options.username(username);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if let Some(mode) = &config.sslmode {
            let mode = PgSslMode::from_str(mode)
                .map_err(|e| QuarryError::config(format!("Invalid sslmode '{mode}': {e}")))?;
            options = options.ssl_mode(mode);
        }
        if let Some(root) = &config.sslrootcert {
            options = options.ssl_root_cert(root);
        }
        if let Some(cert) = &config.sslcert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &config.sslkey {
            options = options.ssl_client_key(key);
        }
        if let Some(search_path) = &config.search_path {
            options = options.options([("search_path", search_path.as_str())]);
        }
        if let Some(charset) = &config.charset {
            options = options.options([("client_encoding", charset.as_str())]);
        }

        // Anything else is passed through as a server runtime parameter.
        for key in config.options.keys() {
            let Some(value) = config.option_str(key) else {
                continue;
            };
            options = match key.as_str() {
                "application_name" => options.application_name(&value),
                _ => options.options([(key.as_str(), value.as_str())]),
            };
        }

        Ok(options)
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Pgsql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let options = Self::connect_options(config)?;
        let timeout =
            Duration::from_secs(config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS));

        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| {
                QuarryError::Backend(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {timeout:?}"),
                )))
            })??;

        debug!("Connected to PostgreSQL {}", config.display_string());
        Ok(Box::new(PostgresHandle { conn }))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    async fn get_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>> {
        let rows = conn
            .fetch_all(&Expression::new(
                r#"
                SELECT table_name::text AS table_name
                FROM information_schema.tables
                WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                vec![Value::from(self.schema.as_str())],
            ))
            .await?;
        Ok(named_column(&rows, "table_name"))
    }

    async fn get_table_columns(
        &self,
        conn: &mut dyn Connection,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = conn
            .fetch_all(&Expression::new(
                r#"
                SELECT column_name::text AS column_name
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                vec![Value::from(self.schema.as_str()), Value::from(table)],
            ))
            .await?;
        Ok(named_column(&rows, "column_name"))
    }

    /// Looks the table up in the catalog. A failed `SELECT` would abort an
    /// open transaction, so the lookup never touches the table itself.
    async fn table_exists(&self, conn: &mut dyn Connection, table: &str) -> bool {
        let (schema, table) = table
            .split_once('.')
            .unwrap_or((self.schema.as_str(), table));
        let lookup = Expression::new(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            ) AS found
            "#,
            vec![Value::from(schema), Value::from(table)],
        );
        match conn.fetch_all(&lookup).await {
            Ok(rows) => rows
                .first()
                .is_some_and(|row| row.get("found") == Some(&Value::Bool(true))),
            Err(e) => {
                debug!("Table {schema}.{table} not found: {e}");
                false
            }
        }
    }

    async fn call_procedure(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        params: &[Value],
        outputs: &OutputParams,
    ) -> Result<ProcedureOutput> {
        // Output parameters are passed as trailing INOUT arguments.
        let mut bindings = params.to_vec();
        bindings.extend(outputs.values().cloned());

        let placeholders: Vec<String> = (1..=bindings.len())
            .map(|i| self.placeholder(i))
            .collect();
        let call = format!("SELECT {name}({})", placeholders.join(", "));
        debug!("{call}");

        let sets = conn.fetch_sets(&Expression::new(call, bindings)).await?;
        let outputs = outputs_from_first_row(&sets, outputs);

        Ok(ProcedureOutput { sets, outputs })
    }

    async fn disable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("SET CONSTRAINTS ALL DEFERRED").await?;
        Ok(())
    }

    async fn enable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("SET CONSTRAINTS ALL IMMEDIATE").await?;
        Ok(())
    }

    async fn truncate(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        reset_auto_increment: bool,
    ) -> Result<u64> {
        if reset_auto_increment {
            let sql = format!(
                "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
                self.quote_identifier(table)
            );
            debug!("{sql}");
            conn.execute_unprepared(&sql).await
        } else {
            self.delete_all(conn, table).await
        }
    }

    async fn drop_table(&self, conn: &mut dyn Connection, table: &str) -> Result<u64> {
        let sql = format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            self.quote_identifier(table)
        );
        debug!("{sql}");
        conn.execute_unprepared(&sql).await
    }
}

/// An open PostgreSQL connection.
pub struct PostgresHandle {
    conn: PgConnection,
}

#[async_trait]
impl Connection for PostgresHandle {
    fn kind(&self) -> DriverKind {
        DriverKind::Pgsql
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

fn build_query(query: &Expression) -> Query<'_, Postgres, PgArguments> {
    query
        .bindings()
        .iter()
        .fold(sqlx::query(query.sql()), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
    }
}

/// Converts a sqlx PgRow to our Row type.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            (
                col.name().to_string(),
                convert_value(row, col.ordinal(), col.type_info().name()),
            )
        })
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    if row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true)
    {
        return Value::Null;
    }

    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<i16, _>(index)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<i32, _>(index)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        "VOID" => Value::Null,

        // For all other types, try to get as string
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Formats a backend error, adding PostgreSQL detail and hint when available.
pub(crate) fn describe_error(error: &sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }
    }

    result
}
