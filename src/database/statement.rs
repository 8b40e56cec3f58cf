//! Row cursor returned by `Database::statement`.

use crate::db::{ConnectionHandle, Expression, Row};
use crate::error::Result;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Rows buffered ahead of the consumer.
const STATEMENT_BUFFER: usize = 64;

/// An executing statement whose rows are consumed one at a time.
///
/// The statement holds its connection exclusively until the last row has
/// been read or the cursor is dropped; other work on the same connection
/// name waits until then.
pub struct Statement {
    rows: mpsc::Receiver<Result<Row>>,
}

impl Statement {
    /// Locks `handle` and starts streaming the rows of `query`.
    pub(crate) async fn open(handle: ConnectionHandle, query: Expression) -> Self {
        let mut conn = handle.lock_owned().await;
        let (tx, rx) = mpsc::channel(STATEMENT_BUFFER);

        tokio::spawn(async move {
            let mut rows = conn.fetch_stream(&query);
            while let Some(row) = rows.next().await {
                let failed = row.is_err();
                if tx.send(row).await.is_err() || failed {
                    break;
                }
            }
        });

        Self { rows: rx }
    }

    /// The next row, or `None` once the statement is exhausted.
    pub async fn next(&mut self) -> Option<Result<Row>> {
        self.rows.recv().await
    }

    /// Reads every remaining row, stopping at the first error.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for Statement {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.poll_recv(cx)
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement").finish_non_exhaustive()
    }
}
