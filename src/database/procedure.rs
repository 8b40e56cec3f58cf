//! Accessor over the result sets a stored procedure produced.

use crate::db::{OutputParams, ProcedureOutput, Row, Value};
use serde::Serialize;
use std::ops::{Index, IndexMut};

static NULL: Value = Value::Null;

/// The result sets and output parameters of one procedure call.
///
/// Besides the bulk accessors, a result carries a cursor (set 0, row 0 by
/// default) that `current_cell`, `set_current_cell` and indexing by column
/// name operate on. Writes through the cursor create missing sets and rows
/// as empty rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcedureResult {
    sets: Vec<Vec<Row>>,
    outputs: OutputParams,
    #[serde(skip)]
    current_set: usize,
    #[serde(skip)]
    current_row: usize,
}

impl ProcedureResult {
    pub fn new(sets: Vec<Vec<Row>>) -> Self {
        Self {
            sets,
            ..Self::default()
        }
    }

    pub fn with_outputs(mut self, outputs: OutputParams) -> Self {
        self.outputs = outputs;
        self
    }

    /// Every row of the first result set.
    pub fn all(&self) -> &[Row] {
        self.result_set(0)
    }

    /// Every result set, in the order the backend returned them.
    pub fn sets(&self) -> &[Vec<Row>] {
        &self.sets
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Row 0 of set 0, or an empty row.
    pub fn first(&self) -> Row {
        self.all().first().cloned().unwrap_or_default()
    }

    /// The last row of set 0, or an empty row.
    pub fn last(&self) -> Row {
        self.all().last().cloned().unwrap_or_default()
    }

    /// The last row of set `index`; `None` when the set is absent or empty.
    pub fn last_set(&self, index: usize) -> Option<&Row> {
        self.sets.get(index).and_then(|set| set.last())
    }

    /// The rows of set `index`, empty when out of range.
    pub fn result_set(&self, index: usize) -> &[Row] {
        self.sets.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, set: usize, row: usize, column: &str) -> Option<&Value> {
        self.sets.get(set)?.get(row)?.get(column)
    }

    pub fn set(&mut self, set: usize, row: usize, column: &str, value: impl Into<Value>) {
        self.row_mut(set, row).insert(column.to_string(), value.into());
    }

    /// The `(set, row)` the cursor points at.
    pub fn cursor(&self) -> (usize, usize) {
        (self.current_set, self.current_row)
    }

    pub fn set_cursor(&mut self, set: usize, row: usize) {
        self.current_set = set;
        self.current_row = row;
    }

    pub fn current_cell(&self, column: &str) -> Option<&Value> {
        self.get(self.current_set, self.current_row, column)
    }

    pub fn set_current_cell(&mut self, column: &str, value: impl Into<Value>) {
        let (set, row) = self.cursor();
        self.set(set, row, column, value);
    }

    /// The value of output parameter `name` after the call.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> &OutputParams {
        &self.outputs
    }

    fn row_mut(&mut self, set: usize, row: usize) -> &mut Row {
        if self.sets.len() <= set {
            self.sets.resize_with(set + 1, Vec::new);
        }
        let rows = &mut self.sets[set];
        if rows.len() <= row {
            rows.resize_with(row + 1, Row::new);
        }
        &mut rows[row]
    }
}

impl From<ProcedureOutput> for ProcedureResult {
    fn from(output: ProcedureOutput) -> Self {
        Self::new(output.sets).with_outputs(output.outputs)
    }
}

/// Reads a column at the cursor; absent cells read as `Null`.
impl Index<&str> for ProcedureResult {
    type Output = Value;

    fn index(&self, column: &str) -> &Value {
        self.current_cell(column).unwrap_or(&NULL)
    }
}

impl IndexMut<&str> for ProcedureResult {
    fn index_mut(&mut self, column: &str) -> &mut Value {
        let (set, row) = self.cursor();
        self.row_mut(set, row)
            .entry(column.to_string())
            .or_insert(Value::Null)
    }
}
