//! Transaction scope over one held connection.
//!
//! A [`Transaction`] owns its [`ConnectionHandle`] from `begin` until it ends, so no other
//! operation can use the connection meanwhile. Every exit path gives the connection back
//! deterministically:
//!
//! - commit or rollback succeeds: the connection is released to its pool
//! - a statement fails: the transaction is rolled back, then the connection is released
//! - rollback itself fails, or the transaction is dropped while active: the connection is
//!   discarded, which makes the server abandon the open transaction

use crate::db::executor::QueryExecutor;
use crate::db::pool::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult, TransactionState};
use tracing::{info, warn};
use uuid::Uuid;

const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// An open transaction.
pub struct Transaction {
    id: String,
    state: TransactionState,
    handle: Option<ConnectionHandle>,
    executor: QueryExecutor,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Open a transaction on `handle`. The handle is discarded if the begin statement fails.
    pub async fn begin(mut handle: ConnectionHandle, executor: QueryExecutor) -> DbResult<Self> {
        let id = format!("tx_{}", Uuid::new_v4().simple());
        let begin = handle.db_type().begin_statement();

        if let Err(e) = executor.execute_control(&mut handle, begin).await {
            handle.discard();
            return Err(DbError::transaction(
                "failed to begin transaction",
                id,
                Some(e),
            ));
        }

        info!(transaction_id = %id, node = %handle.node(), "Transaction started");
        Ok(Self {
            id,
            state: TransactionState::Active,
            handle: Some(handle),
            executor,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Node the held connection belongs to, while the transaction is active.
    pub fn node(&self) -> Option<&str> {
        self.handle.as_ref().map(ConnectionHandle::node)
    }

    /// Run a statement inside the transaction.
    ///
    /// On failure the transaction is rolled back before the error is returned. A rollback
    /// failure is logged and the original error wins.
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<QueryResult> {
        self.ensure_active()?;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| missing_handle(&self.id))?;

        match self.executor.execute(handle, sql, params, timeout_ms).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    /// Commit and release the connection.
    ///
    /// If the commit fails the transaction is rolled back and the commit error is returned,
    /// wrapped in [`DbError::Transaction`].
    pub async fn commit(&mut self) -> DbResult<()> {
        self.ensure_active()?;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| missing_handle(&self.id))?;

        match self.executor.execute_control(handle, COMMIT).await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                if let Some(handle) = self.handle.take() {
                    handle.release();
                }
                info!(transaction_id = %self.id, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.abort(&e).await;
                Err(DbError::transaction("commit failed", &self.id, Some(e)))
            }
        }
    }

    /// Roll back and release the connection.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.ensure_active()?;
        let mut handle = self.handle.take().ok_or_else(|| missing_handle(&self.id))?;
        self.state = TransactionState::RolledBack;

        match self.executor.execute_control(&mut handle, ROLLBACK).await {
            Ok(()) => {
                handle.release();
                info!(transaction_id = %self.id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                handle.discard();
                Err(DbError::transaction("rollback failed", &self.id, Some(e)))
            }
        }
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(DbError::invalid_state(format!(
                "transaction {} is already {}",
                self.id, self.state
            )))
        }
    }

    /// Roll back after `cause`, swallowing any rollback failure.
    async fn abort(&mut self, cause: &DbError) {
        self.state = TransactionState::RolledBack;
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        // A timed-out statement already discarded the connection; closing it ends the transaction
        if !handle.is_live() {
            warn!(transaction_id = %self.id, error = %cause, "Transaction abandoned with its connection");
            return;
        }

        match self.executor.execute_control(&mut handle, ROLLBACK).await {
            Ok(()) => {
                handle.release();
                warn!(transaction_id = %self.id, error = %cause, "Transaction rolled back after failure");
            }
            Err(rollback_err) => {
                handle.discard();
                warn!(
                    transaction_id = %self.id,
                    error = %cause,
                    rollback_error = %rollback_err,
                    "Rollback failed, connection discarded"
                );
            }
        }
    }
}

fn missing_handle(id: &str) -> DbError {
    DbError::internal(format!("transaction {} has no connection", id))
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        if let Some(mut handle) = self.handle.take() {
            handle.discard();
            warn!(
                transaction_id = %self.id,
                "Transaction dropped while active - connection discarded"
            );
        }
    }
}
