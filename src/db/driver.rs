//! The driver contract: everything that differs between backends.

use super::{Connection, DriverKind, Expression, Row, Value};
use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

/// Output parameters of a procedure call: name to value, in call order.
pub type OutputParams = IndexMap<String, Value>;

/// Everything a procedure call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureOutput {
    /// Result sets in the order the backend returned them.
    pub sets: Vec<Vec<Row>>,

    /// Output parameter values after the call.
    pub outputs: OutputParams,
}

/// Trait defining a database backend.
///
/// Drivers hold no connection state; each operation receives the
/// connection it should run on. Every method except [`Driver::table_exists`]
/// propagates backend errors.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The backend family this driver implements.
    fn kind(&self) -> DriverKind;

    /// Opens a connection with the backend's default execution options.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Quotes an identifier, treating `.` as a qualifier separator.
    fn quote_identifier(&self, name: &str) -> String {
        quote_segments(name, '"')
    }

    /// The bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Internal table tracking auto-increment counters, cleared by
    /// [`Driver::drop_all_tables`] instead of being dropped.
    fn sequence_table(&self) -> Option<&'static str> {
        None
    }

    /// Lists the user tables of the connected database.
    async fn get_tables(&self, conn: &mut dyn Connection) -> Result<Vec<String>>;

    /// Lists a table's column names in declaration order.
    async fn get_table_columns(&self, conn: &mut dyn Connection, table: &str)
        -> Result<Vec<String>>;

    /// Probes for a table. Backend errors mean "no such table".
    async fn table_exists(&self, conn: &mut dyn Connection, table: &str) -> bool {
        let probe = Expression::raw(format!(
            "SELECT 1 FROM {} LIMIT 1",
            self.quote_identifier(table)
        ));
        match conn.fetch_all(&probe).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Table {table} not found: {e}");
                false
            }
        }
    }

    /// Calls a stored procedure and drains every result set it returns.
    async fn call_procedure(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        params: &[Value],
        outputs: &OutputParams,
    ) -> Result<ProcedureOutput>;

    async fn disable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()>;

    async fn enable_foreign_key_constraints(&self, conn: &mut dyn Connection) -> Result<()>;

    /// Empties a table. With `reset_auto_increment` the identity counter
    /// restarts; without it the counter keeps its high-water mark.
    async fn truncate(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        reset_auto_increment: bool,
    ) -> Result<u64>;

    async fn drop_table(&self, conn: &mut dyn Connection, table: &str) -> Result<u64> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table));
        debug!("{sql}");
        conn.execute_unprepared(&sql).await
    }

    async fn delete_all(&self, conn: &mut dyn Connection, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {}", self.quote_identifier(table));
        conn.execute(&Expression::raw(sql)).await
    }

    /// Drops every table with foreign key checks disabled and returns how
    /// many were dropped.
    ///
    /// Constraints are re-enabled even when a drop fails; the drop failure
    /// is then returned.
    async fn drop_all_tables(&self, conn: &mut dyn Connection) -> Result<usize> {
        let tables = self.get_tables(conn).await?;

        self.disable_foreign_key_constraints(conn).await?;

        let mut dropped = 0;
        let mut outcome = Ok(());
        for table in &tables {
            if let Err(e) = self.drop_table(conn, table).await {
                outcome = Err(e);
                break;
            }
            dropped += 1;
        }

        if outcome.is_ok() {
            if let Some(sequence) = self.sequence_table() {
                if self.table_exists(conn, sequence).await {
                    outcome = self.delete_all(conn, sequence).await.map(|_| ());
                }
            }
        }

        let enabled = self.enable_foreign_key_constraints(conn).await;
        outcome?;
        enabled?;

        debug!("Dropped {dropped} tables");
        Ok(dropped)
    }
}

/// Quotes each `.`-separated segment with `quote`, doubling embedded quotes.
pub(crate) fn quote_segments(name: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    name.split('.')
        .map(|segment| {
            format!(
                "{quote}{}{quote}",
                segment.replace(quote, &doubled)
            )
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Fills output slots from the first row of the first set, matching by
/// column name. Slots without a matching column keep their initial value.
pub(crate) fn outputs_from_first_row(sets: &[Vec<Row>], outputs: &OutputParams) -> OutputParams {
    let mut filled = outputs.clone();
    if let Some(first) = sets.first().and_then(|set| set.first()) {
        for (name, value) in filled.iter_mut() {
            if let Some(found) = first.get(name) {
                *value = found.clone();
            }
        }
    }
    filled
}

/// Extracts the first column of each row as text.
pub(crate) fn first_column(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.values().next().and_then(Value::as_text))
        .collect()
}

/// Extracts a named column of each row as text.
pub(crate) fn named_column(rows: &[Row], column: &str) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(column).and_then(Value::as_text))
        .collect()
}
