//! DB Pool Cluster Library
//!
//! Connection pooling and query execution over one or more named database nodes
//! (MySQL, SQLite): lazy single-flight pool establishment, leasing by node name or by
//! distribution policy, statement timeouts, typed select/insert/update/delete results and
//! transaction scopes that always give their connection back.

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod models;

pub use config::{ClusterConfig, Config, NodeConfig, PolicyKind};
pub use database::Database;
pub use db::{ConnectionHandle, PoolCluster, QueryExecutor, Transaction};
pub use error::{DbError, DbResult};
