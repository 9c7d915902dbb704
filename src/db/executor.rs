//! Query execution engine.
//!
//! This module runs one statement on a leased [`ConnectionHandle`] with support for:
//! - Positional parameters
//! - Query timeouts (a timed-out connection is discarded, never returned to its pool)
//!
//! SQLite statements run on a worker thread that a dropped future cannot stop, so SQLite gets a
//! progress handler that interrupts the statement inside the engine once its deadline passes.
//! - Result classification into rows or a write acknowledgement
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific statement execution
//! - `sqlite`: SQLite-specific statement execution
//!
//! Whether a statement yields rows is decided once, from the column list of its prepared form,
//! so a `SELECT` that matches nothing is still a row set.

use crate::db::params::{bind_mysql_param, bind_sqlite_param};
use crate::db::pool::{ConnectionHandle, PooledConnection};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DEFAULT_QUERY_TIMEOUT_MS, QueryParam, QueryRequest, QueryResult, WriteAck, timeout_or,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Extra time the runtime waits for SQLite to report an interrupted statement.
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// Query executor that handles statement execution on leased connections.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_timeout: Duration,
}

impl QueryExecutor {
    /// Create a new query executor with the default timeout.
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
        }
    }

    /// Create a query executor whose fallback timeout is `timeout_ms` (0 keeps the default).
    pub fn with_default_timeout(timeout_ms: u64) -> Self {
        Self {
            default_timeout: timeout_or(
                Some(timeout_ms),
                Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            ),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn resolve(&self, timeout_ms: Option<u64>) -> Duration {
        timeout_or(timeout_ms, self.default_timeout)
    }

    /// Run `sql` on `handle` with `params` bound in order.
    ///
    /// A missing or zero `timeout_ms` uses the executor's default. When the timeout expires the
    /// statement is stopped, the handle is discarded and [`DbError::Timeout`] is returned.
    /// Callers that treat every statement failure alike should test
    /// [`DbError::is_query_error`], which covers both `Query` and `Timeout`.
    pub async fn execute(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
        params: &[QueryParam],
        timeout_ms: Option<u64>,
    ) -> DbResult<QueryResult> {
        if !handle.is_live() {
            return Err(DbError::invalid_connection(format!(
                "connection from node '{}' was released or discarded",
                handle.node()
            )));
        }
        if sql.trim().is_empty() {
            return Err(DbError::invalid_query("query text is empty"));
        }

        let query_timeout = self.resolve(timeout_ms);
        let start = Instant::now();

        debug!(
            node = %handle.node(),
            sql = %sql,
            params = params.len(),
            timeout_ms = query_timeout.as_millis() as u64,
            "Executing statement"
        );

        let outcome = match handle.live_mut()? {
            PooledConnection::MySql(conn) => {
                timeout(query_timeout, mysql::run(&mut **conn, sql, params, start)).await
            }
            PooledConnection::SQLite(conn) => {
                timeout(
                    query_timeout + INTERRUPT_GRACE,
                    sqlite::run(&mut **conn, sql, params, start, query_timeout),
                )
                .await
            }
        };

        let result = outcome
            .unwrap_or_else(|_| Err(DbError::timeout("query execution", query_timeout)));
        if matches!(result, Err(DbError::Timeout { .. })) {
            handle.discard();
        }
        result
    }

    /// Run a [`QueryRequest`] on `handle`.
    pub async fn execute_request(
        &self,
        handle: &mut ConnectionHandle,
        request: &QueryRequest,
    ) -> DbResult<QueryResult> {
        self.execute(handle, &request.sql, &request.params, request.timeout_ms)
            .await
    }

    /// Run a transaction control statement (begin, commit, rollback) as plain text.
    pub(crate) async fn execute_control(
        &self,
        handle: &mut ConnectionHandle,
        sql: &str,
    ) -> DbResult<()> {
        let outcome = match handle.live_mut()? {
            PooledConnection::MySql(conn) => {
                timeout(self.default_timeout, mysql::run_raw(&mut **conn, sql)).await
            }
            PooledConnection::SQLite(conn) => {
                timeout(self.default_timeout, sqlite::run_raw(&mut **conn, sql)).await
            }
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                handle.discard();
                Err(DbError::timeout(sql, self.default_timeout))
            }
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.

mod mysql {
    use super::*;
    use sqlx::{Executor, MySqlConnection, Statement};

    pub async fn run(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        start: Instant,
    ) -> DbResult<QueryResult> {
        let returns_rows = !(&mut *conn)
            .prepare(sql)
            .await
            .map_err(DbError::from_query)?
            .columns()
            .is_empty();

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }

        if returns_rows {
            let rows = query
                .fetch_all(&mut *conn)
                .await
                .map_err(DbError::from_query)?;
            return Ok(QueryResult::Rows(
                rows.iter().map(RowToJson::to_json_map).collect(),
            ));
        }

        let done = query
            .execute(&mut *conn)
            .await
            .map_err(DbError::from_query)?;
        Ok(QueryResult::Write(WriteAck {
            affected_rows: done.rows_affected(),
            insert_id: Some(done.last_insert_id()).filter(|id| *id > 0),
            protocol41: true,
            execution_time_ms: elapsed_ms(start),
        }))
    }

    pub async fn run_raw(conn: &mut MySqlConnection, sql: &str) -> DbResult<()> {
        conn.execute(sql).await.map_err(DbError::from_query)?;
        Ok(())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Executor, SqliteConnection, Statement};

    /// VM instructions between deadline checks.
    const PROGRESS_STEPS: i32 = 1_000;

    pub async fn run(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        start: Instant,
        limit: Duration,
    ) -> DbResult<QueryResult> {
        let deadline = start + limit;
        conn.lock_handle()
            .await?
            .set_progress_handler(PROGRESS_STEPS, move || Instant::now() < deadline);

        let outcome = run_statement(conn, sql, params, start).await;

        if let Ok(mut locked) = conn.lock_handle().await {
            locked.remove_progress_handler();
        }

        match outcome {
            // SQLITE_INTERRUPT from the progress handler
            Err(DbError::Query { .. }) if Instant::now() >= deadline => {
                Err(DbError::timeout("query execution", limit))
            }
            other => other,
        }
    }

    async fn run_statement(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        start: Instant,
    ) -> DbResult<QueryResult> {
        let returns_rows = !(&mut *conn)
            .prepare(sql)
            .await
            .map_err(DbError::from_query)?
            .columns()
            .is_empty();

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }

        if returns_rows {
            let rows = query
                .fetch_all(&mut *conn)
                .await
                .map_err(DbError::from_query)?;
            return Ok(QueryResult::Rows(
                rows.iter().map(RowToJson::to_json_map).collect(),
            ));
        }

        // last_insert_rowid is connection-wide and survives statements that insert nothing
        let rowid_before: i64 = sqlx::query_scalar("SELECT last_insert_rowid()")
            .fetch_one(&mut *conn)
            .await
            .map_err(DbError::from_query)?;

        let done = query
            .execute(&mut *conn)
            .await
            .map_err(DbError::from_query)?;
        let rowid = done.last_insert_rowid();
        let inserted = done.rows_affected() > 0 && rowid != rowid_before;
        Ok(QueryResult::Write(WriteAck {
            affected_rows: done.rows_affected(),
            insert_id: inserted
                .then(|| u64::try_from(rowid).ok())
                .flatten()
                .filter(|id| *id > 0),
            protocol41: false,
            execution_time_ms: elapsed_ms(start),
        }))
    }

    pub async fn run_raw(conn: &mut SqliteConnection, sql: &str) -> DbResult<()> {
        conn.execute(sql).await.map_err(DbError::from_query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::db::pool::NodePool;
    use serde_json::json;

    fn sqlite_pool(dir: &tempfile::TempDir) -> NodePool {
        let path = dir.path().join("exec.db");
        NodePool::build("local", &NodeConfig::sqlite(path.to_string_lossy()).resolved())
    }

    #[test]
    fn test_timeout_resolution() {
        let executor = QueryExecutor::new();
        assert_eq!(executor.resolve(None), Duration::from_millis(40_000));
        assert_eq!(executor.resolve(Some(0)), Duration::from_millis(40_000));
        assert_eq!(executor.resolve(Some(25)), Duration::from_millis(25));

        let executor = QueryExecutor::with_default_timeout(500);
        assert_eq!(executor.resolve(None), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();

        let result = QueryExecutor::new()
            .execute(&mut handle, "SELECT 1 AS x", &[], None)
            .await
            .unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["x"], json!(1));
    }

    #[tokio::test]
    async fn test_empty_select_is_still_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        let executor = QueryExecutor::new();

        executor
            .execute(&mut handle, "CREATE TABLE t (id INTEGER PRIMARY KEY)", &[], None)
            .await
            .unwrap();
        let result = executor
            .execute(&mut handle, "SELECT id FROM t", &[], None)
            .await
            .unwrap();
        assert_eq!(result, QueryResult::Rows(Vec::new()));
    }

    #[tokio::test]
    async fn test_write_ack() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        let executor = QueryExecutor::new();

        executor
            .execute(
                &mut handle,
                "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
                &[],
                None,
            )
            .await
            .unwrap();
        let result = executor
            .execute(
                &mut handle,
                "INSERT INTO t (v) VALUES (?)",
                &[QueryParam::from("a")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.insert_id(), Some(1));
        assert_eq!(result.affected_rows(), Some(1));
    }

    #[tokio::test]
    async fn test_insert_id_only_for_new_rowid() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        let executor = QueryExecutor::new();

        for ddl in [
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT UNIQUE)",
            "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID",
        ] {
            executor.execute(&mut handle, ddl, &[], None).await.unwrap();
        }

        let first = executor
            .execute(&mut handle, "INSERT INTO items (name) VALUES ('a')", &[], None)
            .await
            .unwrap();
        assert_eq!(first.insert_id(), Some(1));

        // Same connection: the earlier rowid must not leak into later statements
        let kv = executor
            .execute(&mut handle, "INSERT INTO kv (k, v) VALUES ('x', 'y')", &[], None)
            .await
            .unwrap();
        assert_eq!(kv.affected_rows(), Some(1));
        assert_eq!(kv.insert_id(), None);

        let ignored = executor
            .execute(&mut handle, "INSERT OR IGNORE INTO items (name) VALUES ('a')", &[], None)
            .await
            .unwrap();
        assert_eq!(ignored.affected_rows(), Some(0));
        assert_eq!(ignored.insert_id(), None);

        let updated = executor
            .execute(&mut handle, "UPDATE items SET name = 'b' WHERE id = 1", &[], None)
            .await
            .unwrap();
        assert_eq!(updated.insert_id(), None);

        let second = executor
            .execute(&mut handle, "INSERT INTO items (name) VALUES ('c')", &[], None)
            .await
            .unwrap();
        assert_eq!(second.insert_id(), Some(2));
    }

    #[tokio::test]
    async fn test_timeout_interrupts_statement() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        let executor = QueryExecutor::new();

        let started = Instant::now();
        let err = executor
            .execute(
                &mut handle,
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 50000000) \
                 SELECT count(*) FROM c",
                &[],
                Some(50),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Timeout { timeout_ms: 50, .. }));
        assert!(err.is_query_error());
        assert!(started.elapsed() < INTERRUPT_GRACE);
        assert!(!handle.is_live());
    }

    #[tokio::test]
    async fn test_progress_handler_removed_after_statement() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        let executor = QueryExecutor::new();

        executor
            .execute(&mut handle, "SELECT 1", &[], Some(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Long enough to reach the progress handler; a stale deadline would interrupt it
        let result = executor
            .execute(
                &mut handle,
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 100000) \
                 SELECT count(*) AS n FROM c",
                &[],
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.rows().unwrap()[0]["n"], json!(100000));
    }

    #[tokio::test]
    async fn test_execute_request() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();

        let request = QueryRequest::new("SELECT ? AS a, ? AS b")
            .with_params(vec![QueryParam::from(7), QueryParam::from("seven")])
            .with_timeout(1_000);
        let result = QueryExecutor::new()
            .execute_request(&mut handle, &request)
            .await
            .unwrap();

        let rows = result.rows().unwrap();
        assert_eq!(rows[0]["a"], json!(7));
        assert_eq!(rows[0]["b"], json!("seven"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();

        let result = QueryExecutor::new().execute(&mut handle, "   ", &[], None).await;
        assert!(matches!(result, Err(DbError::InvalidQuery { .. })));
        assert!(handle.is_live());
    }

    #[tokio::test]
    async fn test_discarded_handle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();
        handle.discard();

        let result = QueryExecutor::new()
            .execute(&mut handle, "SELECT 1", &[], None)
            .await;
        assert!(matches!(result, Err(DbError::InvalidConnection { .. })));
    }

    #[tokio::test]
    async fn test_syntax_error_is_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir);
        let mut handle = pool.acquire().await.unwrap();

        let err = QueryExecutor::new()
            .execute(&mut handle, "SELEC 1", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query { .. }));
        assert!(handle.is_live());
    }
}
