//! Named node pools and cluster-wide leasing.

use crate::config::{ClusterConfig, PolicyKind};
use crate::db::pool::{ConnectionHandle, NodePool};
use crate::error::{DbError, DbResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Rule for picking a node when the caller does not name one.
pub trait DistributionPolicy: Send + Sync + std::fmt::Debug {
    /// Pick an index in `0..len`. Never called with `len == 0`.
    fn select(&self, len: usize) -> usize;

    fn name(&self) -> &'static str;
}

/// Cycle through the nodes in registration order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionPolicy for RoundRobin {
    fn select(&self, len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % len
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Pick a node uniformly at random.
#[derive(Debug, Default)]
pub struct Random;

impl DistributionPolicy for Random {
    fn select(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Always pick the first registered node.
#[derive(Debug, Default)]
pub struct Ordered;

impl DistributionPolicy for Ordered {
    fn select(&self, _len: usize) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "ordered"
    }
}

impl From<PolicyKind> for Arc<dyn DistributionPolicy> {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::RoundRobin => Arc::new(RoundRobin::new()),
            PolicyKind::Random => Arc::new(Random),
            PolicyKind::Ordered => Arc::new(Ordered),
        }
    }
}

/// Node name to pool, plus the policy used for anonymous leases.
#[derive(Debug)]
pub struct PoolCluster {
    nodes: Vec<NodePool>,
    by_name: HashMap<String, usize>,
    policy: Arc<dyn DistributionPolicy>,
}

impl Default for PoolCluster {
    fn default() -> Self {
        Self::new(Arc::new(RoundRobin::new()))
    }
}

impl PoolCluster {
    /// Create an empty cluster.
    pub fn new(policy: Arc<dyn DistributionPolicy>) -> Self {
        Self {
            nodes: Vec::new(),
            by_name: HashMap::new(),
            policy,
        }
    }

    /// Register one pool per valid entry of `config` and return how many were registered.
    ///
    /// Entries missing a required field are skipped with a warning, as are names that are
    /// already registered. Fails only when `config` has no entries at all.
    /// Must be called from within a Tokio runtime.
    pub fn connect(&mut self, config: &ClusterConfig) -> DbResult<usize> {
        if config.is_empty() {
            return Err(DbError::configuration(
                "cluster configuration has no nodes",
            ));
        }

        let mut established = 0;
        for (name, node) in config.iter() {
            if !node.is_valid() {
                warn!(node = %name, driver = %node.driver, "Skipping node with missing connection fields");
                continue;
            }
            if self.by_name.contains_key(name) {
                warn!(node = %name, "Skipping node that is already registered");
                continue;
            }

            let pool = NodePool::build(name, &node.resolved());
            self.by_name.insert(name.clone(), self.nodes.len());
            self.nodes.push(pool);
            established += 1;
        }

        info!(
            established,
            configured = config.len(),
            policy = self.policy.name(),
            "Pool cluster established"
        );
        Ok(established)
    }

    /// Lease a connection from `node`, or from the node the policy picks when `node` is
    /// `None` or empty.
    pub async fn get_connection(&self, node: Option<&str>) -> DbResult<ConnectionHandle> {
        if let Some(name) = node.filter(|n| !n.is_empty()) {
            let pool = self
                .node(name)
                .ok_or_else(|| DbError::node_not_found(name))?;
            return pool.acquire().await;
        }

        if self.nodes.is_empty() {
            return Err(DbError::pool_uninitialized(
                "no node pool has been established",
            ));
        }
        let idx = self.policy.select(self.nodes.len()) % self.nodes.len();
        self.nodes[idx].acquire().await
    }

    pub fn node(&self, name: &str) -> Option<&NodePool> {
        self.by_name.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Registered node names, in registration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(NodePool::name).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn policy(&self) -> &dyn DistributionPolicy {
        self.policy.as_ref()
    }

    /// Close every node pool.
    pub async fn close(&self) {
        for pool in &self.nodes {
            pool.close().await;
        }
        info!(nodes = self.nodes.len(), "Pool cluster closed");
    }
}
