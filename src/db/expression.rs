//! Raw SQL expressions.
//!
//! An [`Expression`] pairs a literal SQL fragment with its bindings. It is
//! the unit every statement travels in between the façade and a
//! connection, and the value higher layers use to pass SQL through
//! without any further quoting.

use super::Value;
use std::fmt;

/// Literal SQL plus positional bindings. Never altered once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    sql: String,
    bindings: Vec<Value>,
}

impl Expression {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }

    /// An expression without bindings.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }

    pub fn has_bindings(&self) -> bool {
        !self.bindings.is_empty()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl From<&str> for Expression {
    fn from(sql: &str) -> Self {
        Self::raw(sql)
    }
}

impl From<String> for Expression {
    fn from(sql: String) -> Self {
        Self::raw(sql)
    }
}
