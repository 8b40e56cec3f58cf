//! quarry - a driver-pluggable relational database access layer.
//!
//! Connections are configured by name ([`config::DatabaseConfig`]), opened
//! lazily through a [`db::Driver`] and used through the [`Database`] façade,
//! which also tracks nested transactions per connection name.

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod logging;

pub use config::{ConnectionConfig, DatabaseConfig};
pub use database::{ConnectionRegistry, Database, ProcedureResult, Statement};
pub use db::{Expression, Row, Value};
pub use error::{QuarryError, Result};
