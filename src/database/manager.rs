//! The `Database` façade: connection lookup, nested transactions and
//! dispatch of raw SQL, procedures and schema operations.

use super::procedure::ProcedureResult;
use super::registry::ConnectionRegistry;
use super::statement::Statement;
use crate::config::DatabaseConfig;
use crate::db::{describe_error, ConnectionHandle, Driver, Expression, OutputParams, Row, Value};
use crate::error::{QuarryError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to one named connection of a shared [`ConnectionRegistry`].
///
/// Cloning is cheap; clones share connections and transaction depth.
#[derive(Debug, Clone)]
pub struct Database {
    registry: Arc<ConnectionRegistry>,
    name: Option<String>,
}

impl Database {
    /// Creates a façade bound to the registry's default connection.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            name: None,
        }
    }

    /// Creates a fresh registry from `config` with the built-in drivers.
    pub fn from_config(config: DatabaseConfig) -> Self {
        Self::new(Arc::new(ConnectionRegistry::new(config)))
    }

    /// A façade bound to `name`, sharing this one's registry.
    pub fn connection(&self, name: &str) -> Database {
        Self {
            registry: Arc::clone(&self.registry),
            name: Some(name.to_string()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The connection name this façade resolves to.
    pub fn connection_name(&self) -> String {
        self.registry.resolve_name(self.name.as_deref())
    }

    /// The live connection, opened on first use.
    pub async fn get_connection(&self) -> Result<ConnectionHandle> {
        self.registry.connection(&self.connection_name()).await
    }

    pub fn driver(&self) -> Result<Arc<dyn Driver>> {
        self.registry.driver(&self.connection_name())
    }

    async fn bound(&self) -> Result<(Arc<dyn Driver>, ConnectionHandle)> {
        let handle = self.get_connection().await?;
        Ok((self.driver()?, handle))
    }

    // --- transactions ---

    /// Current transaction nesting depth; 0 outside any transaction.
    pub fn transaction_level(&self) -> u32 {
        self.registry.transaction_depth(&self.connection_name())
    }

    /// Opens a transaction, or a savepoint when one is already open.
    pub async fn begin_transaction(&self) -> Result<()> {
        let name = self.connection_name();
        let handle = self.get_connection().await?;
        let mut conn = handle.lock().await;

        let depth = self.registry.transaction_depth(&name);
        let sql = match depth {
            0 => "BEGIN".to_string(),
            d => format!("SAVEPOINT trans{}", d + 1),
        };
        debug!("[{name}] {sql}");
        conn.execute_unprepared(&sql).await?;

        self.registry.set_transaction_depth(&name, depth + 1);
        Ok(())
    }

    /// Commits the outermost transaction. Inner levels only lower the depth;
    /// outside a transaction this does nothing.
    ///
    /// The depth drops even when `COMMIT` fails. The transaction is then
    /// rolled back so the connection is left outside any transaction.
    pub async fn commit(&self) -> Result<()> {
        let name = self.connection_name();
        let handle = self.get_connection().await?;
        let mut conn = handle.lock().await;

        let depth = self.registry.transaction_depth(&name);
        let result = if depth == 1 {
            debug!("[{name}] COMMIT");
            match conn.execute_unprepared("COMMIT").await {
                Ok(_) => Ok(()),
                Err(e) => {
                    if let Err(rollback_err) = conn.execute_unprepared("ROLLBACK").await {
                        warn!("[{name}] Rollback after failed commit failed: {rollback_err}");
                    }
                    Err(e)
                }
            }
        } else {
            Ok(())
        };

        self.registry.set_transaction_depth(&name, depth.saturating_sub(1));
        result
    }

    /// Rolls back the innermost level: the whole transaction at depth 1,
    /// otherwise the savepoint of the current level.
    ///
    /// The depth drops even when the rollback statement fails.
    pub async fn rollback(&self) -> Result<()> {
        let name = self.connection_name();
        let handle = self.get_connection().await?;
        let mut conn = handle.lock().await;

        let depth = self.registry.transaction_depth(&name);
        let sql = match depth {
            0 => return Ok(()),
            1 => "ROLLBACK".to_string(),
            d => format!("ROLLBACK TO SAVEPOINT trans{d}"),
        };
        debug!("[{name}] {sql}");
        let result = conn.execute_unprepared(&sql).await;

        self.registry.set_transaction_depth(&name, depth - 1);
        result.map(|_| ())
    }

    /// Runs `callback` inside a transaction, retrying it up to `attempts`
    /// times in total.
    ///
    /// The callback gets a clone of this façade, so calls it makes join the
    /// transaction and nested `transaction` calls become savepoints. After
    /// the last failed attempt the callback's own error is returned. A
    /// failed commit counts as a failed attempt.
    pub async fn transaction<T, E, F, Fut>(
        &self,
        mut callback: F,
        attempts: u32,
    ) -> std::result::Result<T, E>
    where
        F: FnMut(Database) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<QuarryError> + std::fmt::Display,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        loop {
            self.begin_transaction().await?;

            let e = match callback(self.clone()).await {
                Ok(value) => match self.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) => E::from(e),
                },
                Err(e) => {
                    if let Err(rollback_err) = self.rollback().await {
                        warn!(
                            "[{}] Rollback after failed transaction failed: {rollback_err}",
                            self.connection_name()
                        );
                    }
                    e
                }
            };

            if attempt >= attempts {
                return Err(e);
            }

            debug!(
                "[{}] Transaction attempt {attempt}/{attempts} failed, retrying: {e}",
                self.connection_name()
            );
            attempt += 1;
        }
    }

    // --- raw SQL ---

    /// Builds a raw expression for [`Database::query_expression`] and
    /// [`Database::execute_expression`].
    pub fn raw(&self, sql: impl Into<String>, bindings: Vec<Value>) -> Expression {
        Expression::new(sql, bindings)
    }

    /// Runs a query and returns every row.
    ///
    /// Backend failures come back as [`QuarryError::Query`].
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        self.query_expression(&Expression::new(sql, params)).await
    }

    pub async fn query_expression(&self, query: &Expression) -> Result<Vec<Row>> {
        let handle = self.get_connection().await?;
        let mut conn = handle.lock().await;

        conn.fetch_all(query).await.map_err(|e| match e {
            QuarryError::Backend(err) => QuarryError::query(describe_error(&err)),
            other => other,
        })
    }

    /// Starts a query whose rows are read incrementally.
    ///
    /// The connection stays locked until the returned [`Statement`] is
    /// exhausted or dropped, so finish with it before issuing other work on
    /// this connection from the same task.
    ///
    /// Only failing to obtain the connection is reported here. Prepare and
    /// execution errors arrive as the first item of the cursor.
    pub async fn statement(&self, sql: &str, params: Vec<Value>) -> Result<Statement> {
        let handle = self.get_connection().await?;
        Ok(Statement::open(handle, Expression::new(sql, params)).await)
    }

    /// Executes a statement and returns the affected row count.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        self.execute_expression(&Expression::new(sql, params)).await
    }

    pub async fn execute_expression(&self, query: &Expression) -> Result<u64> {
        let handle = self.get_connection().await?;
        let mut conn = handle.lock().await;
        conn.execute(query).await
    }

    // --- procedures ---

    /// Calls a stored procedure.
    ///
    /// `outputs` names the output parameters with their initial values;
    /// their values after the call are available from
    /// [`ProcedureResult::output`].
    pub async fn procedure(
        &self,
        name: &str,
        params: Vec<Value>,
        outputs: &[(&str, Value)],
    ) -> Result<ProcedureResult> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;

        let outputs: OutputParams = outputs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        let output = driver
            .call_procedure(conn.as_mut(), name, &params, &outputs)
            .await?;
        Ok(ProcedureResult::from(output))
    }

    // --- schema ---

    pub async fn get_tables(&self) -> Result<Vec<String>> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.get_tables(conn.as_mut()).await
    }

    pub async fn get_table_columns(&self, table: &str) -> Result<Vec<String>> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.get_table_columns(conn.as_mut(), table).await
    }

    /// Whether `table` exists. Errors reaching the connection are still
    /// returned; errors from the probe itself mean `false`.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        Ok(driver.table_exists(conn.as_mut(), table).await)
    }

    pub async fn drop_all_tables(&self) -> Result<usize> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.drop_all_tables(conn.as_mut()).await
    }

    pub async fn disable_foreign_key_constraints(&self) -> Result<()> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.disable_foreign_key_constraints(conn.as_mut()).await
    }

    pub async fn enable_foreign_key_constraints(&self) -> Result<()> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.enable_foreign_key_constraints(conn.as_mut()).await
    }

    pub async fn truncate(&self, table: &str, reset_auto_increment: bool) -> Result<u64> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver
            .truncate(conn.as_mut(), table, reset_auto_increment)
            .await
    }

    pub async fn drop_table(&self, table: &str) -> Result<u64> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.drop_table(conn.as_mut(), table).await
    }

    pub async fn delete_all(&self, table: &str) -> Result<u64> {
        let (driver, handle) = self.bound().await?;
        let mut conn = handle.lock().await;
        driver.delete_all(conn.as_mut(), table).await
    }
}
