//! Error types for the pool cluster.
//!
//! This module defines all error types using `thiserror`. Driver failures are wrapped,
//! never swallowed: the original `sqlx::Error` stays reachable through `source()`.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Pool cluster is not initialized: {message}")]
    PoolUninitialized { message: String },

    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    #[error("Pool exhausted: no connection available on node '{node}' within {timeout_ms}ms")]
    PoolExhausted { node: String, timeout_ms: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid connection: {message}")]
    InvalidConnection { message: String },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// A statement or control step ran past its deadline. Statement timeouts are query
    /// failures too: match both kinds with [`DbError::is_query_error`].
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
        #[source]
        source: Option<Box<DbError>>,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn pool_uninitialized(message: impl Into<String>) -> Self {
        Self::PoolUninitialized {
            message: message.into(),
        }
    }

    /// Create a node not found error.
    pub fn node_not_found(node: impl Into<String>) -> Self {
        Self::NodeNotFound { node: node.into() }
    }

    pub fn pool_exhausted(node: impl Into<String>, timeout: Duration) -> Self {
        Self::PoolExhausted {
            node: node.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn invalid_connection(message: impl Into<String>) -> Self {
        Self::InvalidConnection {
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a transaction error wrapping the failure that caused it.
    pub fn transaction(
        message: impl Into<String>,
        transaction_id: impl Into<String>,
        source: Option<DbError>,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
            source: source.map(Box::new),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a driver failure raised while a statement was running.
    pub fn from_query(err: sqlx::Error) -> Self {
        let (message, sql_state) = match &err {
            sqlx::Error::Database(db_err) => (
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
            ),
            other => (other.to_string(), None),
        };
        Self::Query {
            message,
            sql_state,
            source: err,
        }
    }

    /// Map a failure raised while leasing a connection from `node`.
    pub fn from_acquire(node: &str, acquire_timeout: Duration, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::pool_exhausted(node, acquire_timeout),
            other => {
                let mut mapped = Self::from(other);
                if let Self::Connection { message, .. } = &mut mapped {
                    *message = format!("node '{}': {}", node, message);
                }
                mapped
            }
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Raise the node's connection limit or release connections sooner")
            }
            Self::NodeNotFound { .. } => Some("Check the node name against the configured nodes"),
            _ => None,
        }
    }

    /// True for failures raised by statement execution, statement timeouts included.
    ///
    /// This is the supported test for "the statement failed"; matching `DbError::Query` alone
    /// misses timeouts.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Timeout { .. })
    }

    /// Check if this error is retryable. Informational only, nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::PoolExhausted { .. } | Self::Timeout { .. }
        )
    }
}

/// Convert sqlx errors raised outside statement execution (pool, I/O, protocol).
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the node's host, port and credentials",
            ),
            sqlx::Error::Database(_) => DbError::from_query(err),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted {
                node: "<unknown>".to_string(),
                timeout_ms: 0,
            },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Rebuild the database facade")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::from_query(other),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
