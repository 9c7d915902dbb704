//! Data models for the pool cluster.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, TransactionState};
pub use query::{
    DEFAULT_QUERY_TIMEOUT_MS, QueryParam, QueryRequest, QueryResult, Row, WriteAck,
    resolve_timeout, timeout_or,
};
