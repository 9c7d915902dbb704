//! Per-node connection pools.
//!
//! This module provides connection pooling functionality using database-specific
//! pools (MySqlPool, SqlitePool) to ensure full type support. Each [`NodePool`] wraps the
//! pool of one named endpoint; leasing from it yields a [`ConnectionHandle`].

use crate::config::ResolvedNode;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::pool::PoolConnection;
use sqlx::{
    MySql, MySqlPool, Sqlite, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Number of open connections, idle or leased.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    pub fn num_idle(&self) -> usize {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.num_idle(),
            SQLite(pool) => pool.num_idle(),
        })
    }
}

/// A physical connection leased from a [`DbPool`].
#[derive(Debug)]
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    SQLite(PoolConnection<Sqlite>),
}

/// The pool of one named node.
#[derive(Debug, Clone)]
pub struct NodePool {
    name: Arc<str>,
    pool: DbPool,
    connection_limit: u32,
    acquire_timeout: Duration,
}

impl NodePool {
    /// Build the pool for `name` without opening any connection.
    ///
    /// Connections are opened on first lease, so an unreachable node only fails when it is used.
    /// Must be called from within a Tokio runtime.
    pub fn build(name: &str, node: &ResolvedNode) -> Self {
        let pool = match node.driver {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::new()
                    .host(&node.host)
                    .port(node.port)
                    .username(&node.user)
                    .password(&node.password)
                    .database(&node.database)
                    .charset("utf8mb4");

                DbPool::MySql(
                    MySqlPoolOptions::new()
                        .max_connections(node.connection_limit)
                        .acquire_timeout(node.acquire_timeout)
                        .idle_timeout(Some(node.idle_timeout))
                        .test_before_acquire(true)
                        .connect_lazy_with(options),
                )
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::new()
                    .filename(&node.database)
                    .create_if_missing(true);

                DbPool::SQLite(
                    SqlitePoolOptions::new()
                        .max_connections(node.connection_limit)
                        .acquire_timeout(node.acquire_timeout)
                        .idle_timeout(Some(node.idle_timeout))
                        .test_before_acquire(true)
                        .connect_lazy_with(options),
                )
            }
        };

        debug!(
            node = %name,
            db_type = %node.driver,
            connection_limit = node.connection_limit,
            acquire_timeout_ms = node.acquire_timeout.as_millis() as u64,
            "Built node pool"
        );

        Self {
            name: Arc::from(name),
            pool,
            connection_limit: node.connection_limit,
            acquire_timeout: node.acquire_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    /// Maximum number of simultaneously open connections to this node.
    pub fn connection_limit(&self) -> u32 {
        self.connection_limit
    }

    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    /// Connections open but not leased.
    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Lease a connection, waiting at most the node's acquire timeout for one to free up.
    pub async fn acquire(&self) -> DbResult<ConnectionHandle> {
        let conn = match &self.pool {
            DbPool::MySql(pool) => pool.acquire().await.map(PooledConnection::MySql),
            DbPool::SQLite(pool) => pool.acquire().await.map(PooledConnection::SQLite),
        }
        .map_err(|e| DbError::from_acquire(&self.name, self.acquire_timeout, e))?;

        debug!(node = %self.name, "Leased connection");
        Ok(ConnectionHandle {
            node: Arc::clone(&self.name),
            db_type: self.db_type(),
            conn: Some(conn),
        })
    }

    /// Close the pool, waiting for leased connections to come back.
    pub async fn close(&self) {
        info!(node = %self.name, "Closing node pool");
        self.pool.close().await;
    }
}

/// A connection leased from one node.
///
/// Dropping the handle returns the connection to its pool. [`discard`](Self::discard) closes it
/// instead; a discarded or released handle can no longer run statements.
pub struct ConnectionHandle {
    node: Arc<str>,
    db_type: DatabaseType,
    conn: Option<PooledConnection>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("node", &self.node)
            .field("db_type", &self.db_type)
            .field("live", &self.is_live())
            .finish()
    }
}

impl ConnectionHandle {
    /// Name of the node this connection was leased from.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// True until the handle is released or discarded.
    pub fn is_live(&self) -> bool {
        self.conn.is_some()
    }

    /// Return the connection to its pool now.
    pub fn release(mut self) {
        if self.conn.take().is_some() {
            debug!(node = %self.node, "Released connection");
        }
    }

    /// Close the connection instead of returning it to the pool.
    ///
    /// The pool frees the slot, so a replacement connection is opened on a later lease.
    pub fn discard(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match conn {
            PooledConnection::MySql(c) => drop(c.detach()),
            PooledConnection::SQLite(c) => drop(c.detach()),
        }
        warn!(node = %self.node, "Discarded connection");
    }

    pub(crate) fn live_mut(&mut self) -> DbResult<&mut PooledConnection> {
        let node = &self.node;
        self.conn.as_mut().ok_or_else(|| {
            DbError::invalid_connection(format!(
                "connection from node '{}' was released or discarded",
                node
            ))
        })
    }
}
