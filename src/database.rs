//! The process-facing database facade.
//!
//! [`Database`] owns one [`PoolCluster`], built from its [`ClusterConfig`] the first time any
//! entry point needs a connection. Establishment is single-flight: concurrent first callers
//! wait on the same attempt, and the connect step runs once per facade. A failed attempt is not
//! remembered, so a later call tries again.
//!
//! Every statement method has a `*_with_connection` twin that runs on a caller-held
//! [`ConnectionHandle`] instead of leasing one.

use crate::config::{ClusterConfig, PolicyKind};
use crate::db::{ConnectionHandle, PoolCluster, QueryExecutor, Transaction};
use crate::error::DbResult;
use crate::models::{QueryParam, QueryResult, Row};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug)]
pub struct Database {
    config: ClusterConfig,
    policy: PolicyKind,
    executor: QueryExecutor,
    cluster: OnceCell<PoolCluster>,
    establish_count: AtomicUsize,
}

impl Database {
    /// Create a facade using round-robin distribution. No pool is built yet.
    pub fn new(config: ClusterConfig) -> Self {
        Self::with_policy(config, PolicyKind::default())
    }

    pub fn with_policy(config: ClusterConfig, policy: PolicyKind) -> Self {
        Self {
            config,
            policy,
            executor: QueryExecutor::new(),
            cluster: OnceCell::new(),
            establish_count: AtomicUsize::new(0),
        }
    }

    /// Replace the executor, e.g. to change the fallback statement timeout.
    pub fn with_executor(mut self, executor: QueryExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    // =========================================================================
    // Establishment
    // =========================================================================

    /// Build the cluster if that has not happened yet and return its number of nodes.
    pub async fn establish(&self) -> DbResult<usize> {
        Ok(self.cluster().await?.len())
    }

    pub fn is_established(&self) -> bool {
        self.cluster.initialized()
    }

    /// How many times the connect step has run.
    pub fn establish_count(&self) -> usize {
        self.establish_count.load(Ordering::SeqCst)
    }

    /// The established cluster, building it on first use.
    pub async fn cluster(&self) -> DbResult<&PoolCluster> {
        self.cluster.get_or_try_init(|| self.connect_cluster()).await
    }

    async fn connect_cluster(&self) -> DbResult<PoolCluster> {
        let attempt = self.establish_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            attempt,
            nodes = self.config.len(),
            policy = %self.policy,
            "Establishing pool cluster"
        );

        let mut cluster = PoolCluster::new(self.policy.into());
        cluster.connect(&self.config)?;
        Ok(cluster)
    }

    /// Close every node pool. Only meaningful once established.
    pub async fn close(&self) {
        if let Some(cluster) = self.cluster.get() {
            cluster.close().await;
        }
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Lease a connection chosen by the distribution policy.
    pub async fn get_connection(&self) -> DbResult<ConnectionHandle> {
        self.cluster().await?.get_connection(None).await
    }

    /// Lease a connection from the named node.
    pub async fn get_connection_from(&self, node: &str) -> DbResult<ConnectionHandle> {
        self.cluster().await?.get_connection(Some(node)).await
    }

    // =========================================================================
    // Statements on a leased connection
    // =========================================================================

    /// Run a statement and return its result unchanged.
    pub async fn query(
        &self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<QueryResult> {
        let mut handle = self.get_connection().await?;
        let result = self
            .query_with_connection(&mut handle, sql, params, timeout_ms)
            .await;
        handle.release();
        result
    }

    /// Run a read statement. `None` means no row matched.
    pub async fn select(
        &self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<Vec<Row>>> {
        Ok(self
            .query(sql, params, timeout_ms)
            .await?
            .into_non_empty_rows())
    }

    /// Run an insert and return the generated id, if the driver reported one.
    pub async fn insert(
        &self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self.query(sql, params, timeout_ms).await?.insert_id())
    }

    /// Run an update and return the number of affected rows.
    pub async fn update(
        &self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self.query(sql, params, timeout_ms).await?.affected_rows())
    }

    /// Run a delete and return the number of affected rows.
    pub async fn delete(
        &self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self.query(sql, params, timeout_ms).await?.affected_rows())
    }

    // =========================================================================
    // Statements on a caller-held connection
    // =========================================================================

    pub async fn query_with_connection(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<QueryResult> {
        self.executor.execute(handle, sql, params, timeout_ms).await
    }

    pub async fn select_with_connection(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<Vec<Row>>> {
        Ok(self
            .query_with_connection(handle, sql, params, timeout_ms)
            .await?
            .into_non_empty_rows())
    }

    pub async fn insert_with_connection(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self
            .query_with_connection(handle, sql, params, timeout_ms)
            .await?
            .insert_id())
    }

    pub async fn update_with_connection(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self
            .query_with_connection(handle, sql, params, timeout_ms)
            .await?
            .affected_rows())
    }

    pub async fn delete_with_connection(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<Option<u64>> {
        Ok(self
            .query_with_connection(handle, sql, params, timeout_ms)
            .await?
            .affected_rows())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Lease a connection chosen by the distribution policy and open a transaction on it.
    pub async fn begin_transaction(&self) -> DbResult<Transaction> {
        let handle = self.get_connection().await?;
        Transaction::begin(handle, self.executor.clone()).await
    }

    /// Open a transaction on a connection from the named node.
    pub async fn begin_transaction_on(&self, node: &str) -> DbResult<Transaction> {
        let handle = self.get_connection_from(node).await?;
        Transaction::begin(handle, self.executor.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::error::DbError;

    #[tokio::test]
    async fn test_establish_is_lazy_and_once() {
        let config = ClusterConfig::new()
            .with_node("master", NodeConfig::mysql("db1.invalid", "app", "secret", "shop"));
        let db = Database::new(config);
        assert!(!db.is_established());
        assert_eq!(db.establish_count(), 0);

        assert_eq!(db.establish().await.unwrap(), 1);
        assert_eq!(db.establish().await.unwrap(), 1);
        assert!(db.is_established());
        assert_eq!(db.establish_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_establishment_is_retried() {
        let db = Database::new(ClusterConfig::new());

        let err = db.establish().await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(db.establish().await.is_err());
        assert!(!db.is_established());
        assert_eq!(db.establish_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let config = ClusterConfig::new()
            .with_node("master", NodeConfig::mysql("db1.invalid", "app", "secret", "shop"));
        let db = Database::new(config);

        let err = db.get_connection_from("slave9").await.unwrap_err();
        assert!(matches!(err, DbError::NodeNotFound { .. }));
        assert_eq!(db.establish_count(), 1);
    }
}
