//! The connection manager clients talk to.
//!
//! A [`ConnectionRegistry`] owns one lazily-opened connection per configured
//! name plus its transaction depth; [`Database`] is the cheap, cloneable
//! façade bound to one of those names.

mod manager;
mod procedure;
mod registry;
mod statement;

pub use manager::Database;
pub use procedure::ProcedureResult;
pub use registry::ConnectionRegistry;
pub use statement::Statement;
