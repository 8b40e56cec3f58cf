//! The live connection contract implemented by every backend.

use super::{DriverKind, Expression, Row};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A cached, shareable connection. One exists per configured connection name.
pub type ConnectionHandle = Arc<Mutex<Box<dyn Connection>>>;

/// A single open connection to a backend.
///
/// Backend errors are returned as [`crate::error::QuarryError::Backend`].
#[async_trait]
pub trait Connection: Send {
    /// The backend this connection talks to.
    fn kind(&self) -> DriverKind;

    /// Prepares, binds and executes a statement, returning the affected row count.
    async fn execute(&mut self, query: &Expression) -> Result<u64>;

    /// Executes a statement over the simple protocol, without preparing it.
    ///
    /// Used for transaction control, DDL and pragmas, which some backends
    /// refuse to prepare.
    async fn execute_unprepared(&mut self, sql: &str) -> Result<u64>;

    /// Fetches every row of the first result set.
    async fn fetch_all(&mut self, query: &Expression) -> Result<Vec<Row>>;

    /// Fetches every result set the statement produces, in order.
    ///
    /// A set without rows is reported as an empty set, so later sets keep
    /// their position.
    async fn fetch_sets(&mut self, query: &Expression) -> Result<Vec<Vec<Row>>>;

    /// Streams rows one at a time instead of materializing them.
    fn fetch_stream<'a>(&'a mut self, query: &'a Expression) -> BoxStream<'a, Result<Row>>;
}

/// Splits a `fetch_many` stream into result sets. Each `Left` item closes
/// the set being collected, even when it has no rows.
pub(crate) async fn collect_sets<'a, R, D>(
    mut stream: BoxStream<'a, std::result::Result<sqlx::Either<R, D>, sqlx::Error>>,
    convert: impl Fn(&D) -> Row,
) -> Result<Vec<Vec<Row>>> {
    use futures::TryStreamExt;

    let mut sets = Vec::new();
    let mut current = Vec::new();

    while let Some(item) = stream.try_next().await? {
        match item {
            sqlx::Either::Left(_) => sets.push(std::mem::take(&mut current)),
            sqlx::Either::Right(row) => current.push(convert(&row)),
        }
    }

    if !current.is_empty() {
        sets.push(current);
    }

    Ok(sets)
}
