//! Mock drivers for testing.
//!
//! `MockDriver` opens connections that record every statement they are
//! asked to run and answer with canned rows. `FailingDriver` never connects.

use super::driver::outputs_from_first_row;
use super::{
    Connection, Driver, DriverKind, Expression, OutputParams, ProcedureOutput, Row, Value,
};
use crate::config::ConnectionConfig;
use crate::error::{QuarryError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, ordered record of the SQL issued through mock connections.
#[derive(Debug, Clone, Default)]
pub struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    fn entries(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, sql: &str) {
        self.entries().push(sql.to_string());
    }

    /// Every statement recorded so far, oldest first.
    pub fn statements(&self) -> Vec<String> {
        self.entries().clone()
    }

    /// How many recorded statements are exactly `sql`.
    pub fn count(&self, sql: &str) -> usize {
        self.entries().iter().filter(|s| s.as_str() == sql).count()
    }

    /// How many recorded statements contain `fragment`.
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.entries().iter().filter(|s| s.contains(fragment)).count()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

/// A driver whose connections record statements instead of running them.
///
/// The mock speaks the SQLite dialect for the statements it generates.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    log: StatementLog,
    connects: Arc<AtomicUsize>,
    tables: Vec<String>,
    result_sets: Vec<Vec<Row>>,
    fail_on: Vec<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables reported by `get_tables`.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Rows returned by every fetch; `fetch_all` sees the first set.
    pub fn with_result_sets(mut self, sets: Vec<Vec<Row>>) -> Self {
        self.result_sets = sets;
        self
    }

    /// Makes every statement containing `fragment` fail with a backend error.
    pub fn fail_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on.push(fragment.into());
        self
    }

    /// The log shared by every connection this driver opens.
    pub fn log(&self) -> StatementLog {
        self.log.clone()
    }

    /// How many times `connect` has been called.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            log: self.log.clone(),
            result_sets: self.result_sets.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }

    async fn get_tables(&self, _conn: &mut dyn Connection) -> Result<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn get_table_columns(
        &self,
        conn: &mut dyn Connection,
        _table: &str,
    ) -> Result<Vec<String>> {
        Ok(conn
            .fetch_all(&Expression::raw("PRAGMA table_info"))
            .await?
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn call_procedure(
        &self,
        conn: &mut dyn Connection,
        name: &str,
        params: &[Value],
        outputs: &OutputParams,
    ) -> Result<ProcedureOutput> {
        let placeholders = vec!["?"; params.len() + outputs.len()].join(", ");
        let sets = conn
            .fetch_sets(&Expression::new(
                format!("CALL {name}({placeholders})"),
                params.to_vec(),
            ))
            .await?;
        let outputs = outputs_from_first_row(&sets, outputs);
        Ok(ProcedureOutput { sets, outputs })
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
        _reset_auto_increment: bool,
    ) -> Result<u64> {
        self.delete_all(conn, table).await
    }
}

/// Connection opened by [`MockDriver`].
struct MockConnection {
    log: StatementLog,
    result_sets: Vec<Vec<Row>>,
    fail_on: Vec<String>,
}

impl MockConnection {
    fn record(&self, sql: &str) -> Result<()> {
        self.log.push(sql);
        match self.fail_on.iter().find(|fragment| sql.contains(fragment.as_str())) {
            Some(_) => Err(QuarryError::Backend(sqlx::Error::Protocol(format!(
                "mock failure on: {sql}"
            )))),
            None => Ok(()),
        }
    }

    fn first_set(&self) -> Vec<Row> {
        self.result_sets.first().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn execute(&mut self, query: &Expression) -> Result<u64> {
        self.record(query.sql())?;
        Ok(1)
    }

    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        Ok(0)
    }

    async fn fetch_all(&mut self, query: &Expression) -> Result<Vec<Row>> {
        self.record(query.sql())?;
        Ok(self.first_set())
    }

    async fn fetch_sets(&mut self, query: &Expression) -> Result<Vec<Vec<Row>>> {
        self.record(query.sql())?;
        Ok(self.result_sets.clone())
    }

    fn fetch_stream<'a>(&'a mut self, query: &'a Expression) -> BoxStream<'a, Result<Row>> {
        match self.record(query.sql()) {
            Ok(()) => stream::iter(self.first_set().into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

/// A driver whose `connect` always fails, for exercising error paths.
#[derive(Debug, Clone, Default)]
pub struct FailingDriver;

#[async_trait]
impl Driver for FailingDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Err(QuarryError::Backend(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("connection refused ({})", config.display_string()),
        ))))
    }

    async fn get_tables(&self, _conn: &mut dyn Connection) -> Result<Vec<String>> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }

    async fn get_table_columns(
        &self,
        _conn: &mut dyn Connection,
        _table: &str,
    ) -> Result<Vec<String>> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }

    async fn call_procedure(
        &self,
        _conn: &mut dyn Connection,
        _name: &str,
        _params: &[Value],
        _outputs: &OutputParams,
    ) -> Result<ProcedureOutput> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }

    async fn disable_foreign_key_constraints(&self, _conn: &mut dyn Connection) -> Result<()> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }

    async fn enable_foreign_key_constraints(&self, _conn: &mut dyn Connection) -> Result<()> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }

    async fn truncate(
        &self,
        _conn: &mut dyn Connection,
        _table: &str,
        _reset_auto_increment: bool,
    ) -> Result<u64> {
        Err(QuarryError::internal("FailingDriver has no connections"))
    }
}
