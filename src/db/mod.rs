//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Per-node connection pools and leased connection handles
//! - The pool cluster and its distribution policies
//! - Query execution
//! - Type mappings
//! - Backend dispatch and parameter macros
//! - Transaction scope

pub mod cluster;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use cluster::{DistributionPolicy, Ordered, PoolCluster, Random, RoundRobin};
pub use executor::QueryExecutor;
pub use pool::{ConnectionHandle, DbPool, NodePool};
pub use transaction::Transaction;
