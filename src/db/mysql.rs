//! MySQL driver implementation.
//!
//! Provides the `MySqlDriver` struct implementing the `Driver` trait and
//! the connection it opens, using sqlx.

use super::connection::collect_sets;
use super::driver::{first_column, named_column, quote_segments};
use super::{
    Connection, Driver, DriverKind, Expression, OutputParams, ProcedureOutput, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column as SqlxColumn, ConnectOptions, MySql, Row as SqlxRow, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Character set used when the config does not name one.
const DEFAULT_CHARSET: &str = "utf8mb4";

/// Connect timeout used when the config does not set one.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Prefix of the session variables that carry procedure output parameters.
const OUTPUT_VARIABLE_PREFIX: &str = "@_quarry_out_";

/// MySQL (and MariaDB) driver.
#[derive(Debug, Default, Clone)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }

    /// Builds connect options from the connection config.
    pub fn connect_options(config: &ConnectionConfig) -> Result<MySqlConnectOptions> {
        let mut options = MySqlConnectOptions::new()
            .host(config.host.as_deref().unwrap_or("localhost"))
            .port(config.port.unwrap_or(DriverKind::Mysql.default_port()))
            .charset(config.charset.as_deref().unwrap_or(DEFAULT_CHARSET));

        if let Some(database) = &config.database {
            options = options.database(database);
        }
        if let Some(username) = &config.username {
            options = options.username(username);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if let Some(collation) = &config.collation {
            options = options.collation(collation);
        }
        if let Some(mode) = &config.sslmode {
            let mode = MySqlSslMode::from_str(mode)
                .map_err(|e| QuarryError::config(format!("Invalid sslmode '{mode}': {e}")))?;
            options = options.ssl_mode(mode);
        }
        if let Some(ca) = &config.sslrootcert {
            options = options.ssl_ca(ca);
        }
        if let Some(cert) = &config.sslcert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &config.sslkey {
            options = options.ssl_client_key(key);
        }

        for key in config.options.keys() {
            match key.as_str() {
                "unix_socket" => {
                    if let Some(socket) = config.option_str(key) {
                        options = options.socket(socket);
                    }
                }
                "timezone" => options = options.timezone(config.option_str(key)),
                "pipes_as_concat" => {
                    options = options.pipes_as_concat(config.option_bool(key).unwrap_or(false))
                }
                other => warn!("Ignoring unknown MySQL option '{other}'"),
            }
        }

        Ok(options)
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Mysql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let options = Self::connect_options(config)?;
        let timeout =
            Duration::from_secs(config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS));

        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| connect_timed_out(timeout))??;

        debug!("Connected to MySQL {}", config.display_string());
        Ok(Box::new(MySqlHandle { conn }))
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_segments(name, '`')
    }

    async fn get_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>> {
        let rows = conn
            .fetch_all(&Expression::raw(
                "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'",
            ))
            .await?;
        Ok(first_column(&rows))
    }

    async fn get_table_columns(
        &self,
        conn: &mut dyn Connection,
        table: &str,
    ) -> Result<Vec<String>> {
        let sql = format!("DESCRIBE {}", self.quote_identifier(table));
        let rows = conn.fetch_all(&Expression::raw(sql)).await?;
        Ok(named_column(&rows, "Field"))
    }

    async fn call_procedure(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        params: &[Value],
        outputs: &OutputParams,
    ) -> Result<ProcedureOutput> {
        let variables: Vec<String> = (0..outputs.len())
            .map(|i| format!("{OUTPUT_VARIABLE_PREFIX}{i}"))
            .collect();

        for (variable, initial) in variables.iter().zip(outputs.values()) {
            conn.execute(&Expression::new(
                format!("SET {variable} = ?"),
                vec![initial.clone()],
            ))
            .await?;
        }

        let arguments: Vec<String> = (1..=params.len())
            .map(|i| self.placeholder(i))
            .chain(variables.iter().cloned())
            .collect();
        let call = format!("CALL {name}({})", arguments.join(", "));
        debug!("{call}");

        let mut sets = conn
            .fetch_sets(&Expression::new(call, params.to_vec()))
            .await?;
        // CALL ends with a status result that carries no rows.
        if sets.last().is_some_and(Vec::is_empty) {
            sets.pop();
        }

        let mut filled = outputs.clone();
        if !variables.is_empty() {
            let columns: Vec<String> = variables
                .iter()
                .zip(outputs.keys())
                .map(|(variable, output)| {
                    format!("{variable} AS {}", self.quote_identifier(output))
                })
                .collect();
            let select = Expression::raw(format!("SELECT {}", columns.join(", ")));
            if let Some(values) = conn.fetch_all(&select).await?.first() {
                for (output, value) in filled.iter_mut() {
                    if let Some(found) = values.get(output) {
                        *value = found.clone();
                    }
                }
            }
        }

        Ok(ProcedureOutput {
            sets,
            outputs: filled,
        })
    }

    async fn disable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("SET FOREIGN_KEY_CHECKS=0").await?;
        Ok(())
    }

    async fn enable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute_unprepared("SET FOREIGN_KEY_CHECKS=1").await?;
        Ok(())
    }

    async fn truncate(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        reset_auto_increment: bool,
    ) -> Result<u64> {
        if reset_auto_increment {
            let sql = format!("TRUNCATE TABLE {}", self.quote_identifier(table));
            debug!("{sql}");
            conn.execute_unprepared(&sql).await
        } else {
            self.delete_all(conn, table).await
        }
    }
}

/// An open MySQL connection.
pub struct MySqlHandle {
    conn: MySqlConnection,
}

#[async_trait]
impl Connection for MySqlHandle {
    fn kind(&self) -> DriverKind {
        DriverKind::Mysql
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

fn build_query(query: &Expression) -> Query<'_, MySql, MySqlArguments> {
    query
        .bindings()
        .iter()
        .fold(sqlx::query(query.sql()), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
    }
}

fn connect_timed_out(timeout: Duration) -> QuarryError {
    QuarryError::Backend(sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("connect timed out after {timeout:?}"),
    )))
}

/// Converts a sqlx MySqlRow to our Row type.
fn convert_row(row: &MySqlRow) -> Row {
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

/// Converts a single column value from a MySqlRow to our Value type.
fn convert_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    if row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true)
    {
        return Value::Null;
    }

    let type_name = type_name.to_uppercase();
    match type_name.as_str() {
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => match row.try_get::<u64, _>(index) {
            Ok(v) => i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::String(v.to_string())),
            Err(_) => Value::Null,
        },

        "FLOAT" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "DOUBLE" => row
            .try_get::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => row
            .try_get::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        // DECIMAL, dates and the text types all arrive as text on the wire
        _ => row
            .try_get::<String, _>(index)
            .or_else(|_| row.try_get_unchecked::<String, _>(index))
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
