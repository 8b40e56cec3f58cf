//! Error types for quarry.
//!
//! Defines the main error enum used throughout the crate.

use thiserror::Error;

/// Main error type for quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Configuration errors (unknown connection name, malformed config file or URL).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection errors raised while a driver opens its handle.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query errors reported by the manager-level `query()` path.
    #[error("Query error: {0}")]
    Query(String),

    /// Native backend errors, propagated as-is.
    #[error(transparent)]
    Backend(#[from] sqlx::Error),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuarryError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a connection error tagged with the connection name.
    pub fn connection(name: &str, msg: impl std::fmt::Display) -> Self {
        Self::Connection(format!("[{name}] {msg}"))
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Backend(_) => "Database Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using QuarryError.
pub type Result<T> = std::result::Result<T, QuarryError>;
