//! Query execution engine.
//!
//! This module provides statement execution against the live pool with support for:
//! - Parameterized queries (bound `$n` placeholders)
//! - A per-command timeout
//! - Multi-statement transactions with rollback on the first failure
//!
//! Statements without parameters are sent as raw SQL through the simple query protocol.
//! Some CockroachDB statements (`SHOW ...`, `IMPORT`, cluster settings) cannot be prepared.

use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use futures_util::StreamExt;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Failure inside [`QueryExecutor::run_transaction`].
#[derive(Debug)]
pub struct TransactionFailure {
    pub error: DbError,
    /// Statements that succeeded before the failing one; all of them were rolled back.
    pub completed: usize,
}

/// Query executor that handles statement execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    command_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Execute a statement and return every row it produces.
    pub async fn fetch(
        &self,
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let start = Instant::now();

        debug!(
            sql = %sql,
            params = params.len(),
            timeout_secs = self.command_timeout.as_secs(),
            "Executing query"
        );

        let rows_future = if params.is_empty() {
            pool.fetch(sql).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch(pool).collect::<Vec<_>>()
        };

        let rows = match timeout(self.command_timeout, rows_future).await {
            Ok(results) => collect_rows(results)?,
            Err(_) => return Err(timeout_error("query execution", self.command_timeout)),
        };

        Ok(process_rows(rows, start))
    }

    /// Execute a statement that returns no rows and report the affected row count.
    pub async fn execute(&self, pool: &PgPool, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        debug!(
            sql = %sql,
            params = params.len(),
            timeout_secs = self.command_timeout.as_secs(),
            "Executing statement"
        );

        let result = if params.is_empty() {
            timeout(self.command_timeout, pool.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(self.command_timeout, query.execute(pool)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", self.command_timeout)),
        }
    }

    /// Run `statements` in order inside one transaction.
    ///
    /// The first failure stops execution, rolls back everything and reports how many
    /// statements had completed. Statements after the failing one are never sent.
    pub async fn run_transaction(
        &self,
        pool: &PgPool,
        statements: &[String],
    ) -> Result<Vec<QueryResult>, TransactionFailure> {
        let fail = |error: DbError, completed: usize| TransactionFailure { error, completed };

        let mut tx = match timeout(self.command_timeout, pool.begin()).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => return Err(fail(e.into(), 0)),
            Err(_) => return Err(fail(timeout_error("begin transaction", self.command_timeout), 0)),
        };

        let mut runner = TxStatements {
            tx: &mut tx,
            command_timeout: self.command_timeout,
        };
        let results = match run_in_order(&mut runner, statements).await {
            Ok(results) => results,
            Err(failure) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                return Err(failure);
            }
        };

        match timeout(self.command_timeout, tx.commit()).await {
            Ok(Ok(())) => Ok(results),
            Ok(Err(e)) => Err(fail(e.into(), results.len())),
            Err(_) => Err(fail(
                timeout_error("commit", self.command_timeout),
                results.len(),
            )),
        }
    }
}

/// Executes one statement at a time inside an open transaction.
pub trait StatementRunner: Send {
    fn run(&mut self, sql: &str) -> impl Future<Output = DbResult<QueryResult>> + Send;
}

struct TxStatements<'a, 'c> {
    tx: &'a mut Transaction<'c, Postgres>,
    command_timeout: Duration,
}

impl StatementRunner for TxStatements<'_, '_> {
    async fn run(&mut self, sql: &str) -> DbResult<QueryResult> {
        let start = Instant::now();
        let fetched = timeout(
            self.command_timeout,
            (&mut **self.tx).fetch(sql).collect::<Vec<_>>(),
        )
        .await;
        match fetched {
            Ok(rows) => collect_rows(rows).map(|rows| process_rows(rows, start)),
            Err(_) => Err(timeout_error("transaction statement", self.command_timeout)),
        }
    }
}

/// Send `statements` through `runner` until one fails.
///
/// On failure `completed` counts the statements that succeeded before it; nothing after
/// the failing statement is sent. Rolling back is the caller's job.
pub async fn run_in_order<R: StatementRunner>(
    runner: &mut R,
    statements: &[String],
) -> Result<Vec<QueryResult>, TransactionFailure> {
    let mut results = Vec::with_capacity(statements.len());
    for (idx, sql) in statements.iter().enumerate() {
        debug!(statement = idx + 1, sql = %sql, "Executing statement in transaction");
        match runner.run(sql).await {
            Ok(result) => results.push(result),
            Err(error) => {
                let completed = results.len();
                warn!(
                    statement = idx + 1,
                    completed,
                    error = %error,
                    "Transaction statement failed, rolling back"
                );
                return Err(TransactionFailure { error, completed });
            }
        }
    }
    Ok(results)
}

/// Decode fetched rows into a QueryResult.
fn process_rows(rows: Vec<PgRow>, start: Instant) -> QueryResult {
    let columns = rows
        .first()
        .map(|r| r.column_metadata())
        .unwrap_or_default();
    let rows = rows.iter().map(|r| r.to_json_map()).collect();

    QueryResult {
        columns,
        rows,
        duration: start.elapsed().as_secs_f64(),
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::str::FromStr;

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::from_str("postgresql://root@127.0.0.1:1/defaultdb").unwrap();
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy_with(options)
    }

    #[test]
    fn test_timeout_error() {
        let err = timeout_error("query execution", Duration::from_secs(60));
        assert!(matches!(
            err,
            DbError::Timeout {
                elapsed_secs: 60,
                ..
            }
        ));
    }

    #[test]
    fn test_collect_rows_surfaces_first_error() {
        let results: Vec<Result<u8, sqlx::Error>> =
            vec![Ok(1), Err(sqlx::Error::PoolTimedOut), Ok(2)];
        assert!(collect_rows(results).is_err());
        let results: Vec<Result<u8, sqlx::Error>> = vec![Ok(1), Ok(2)];
        assert_eq!(collect_rows(results).unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_against_unreachable_pool_fails() {
        let executor = QueryExecutor::new(Duration::from_secs(5));
        let pool = unreachable_pool();
        let err = executor.fetch(&pool, "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    /// Fails the statement at `fail_at` and records everything it was sent.
    struct ScriptedRunner {
        fail_at: Option<usize>,
        sent: Vec<String>,
    }

    impl StatementRunner for ScriptedRunner {
        async fn run(&mut self, sql: &str) -> DbResult<QueryResult> {
            let idx = self.sent.len();
            self.sent.push(sql.to_string());
            if self.fail_at == Some(idx) {
                let code = Some("23505".to_string());
                return Err(DbError::database("duplicate key value", code, "fix it"));
            }
            Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                duration: 0.0,
            })
        }
    }

    fn statements(sql: &[&str]) -> Vec<String> {
        sql.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_statement_failure_stops_after_one_completed() {
        let mut runner = ScriptedRunner {
            fail_at: Some(1),
            sent: Vec::new(),
        };
        let queries = statements(&[
            "INSERT INTO t VALUES (1)",
            "INSERT INTO t VALUES (1)",
            "INSERT INTO t VALUES (2)",
        ]);
        let failure = run_in_order(&mut runner, &queries).await.unwrap_err();
        assert_eq!(failure.completed, 1);
        assert!(matches!(failure.error, DbError::Database { .. }));
        assert_eq!(runner.sent, queries[..2].to_vec());
    }

    #[tokio::test]
    async fn test_all_statements_run_when_none_fail() {
        let mut runner = ScriptedRunner {
            fail_at: None,
            sent: Vec::new(),
        };
        let queries = statements(&["SELECT 1", "SELECT 2", "SELECT 3"]);
        let results = run_in_order(&mut runner, &queries).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(runner.sent, queries);
    }

    #[tokio::test]
    async fn test_first_statement_failure_reports_zero_completed() {
        let mut runner = ScriptedRunner {
            fail_at: Some(0),
            sent: Vec::new(),
        };
        let failure = run_in_order(&mut runner, &statements(&["SELEC 1", "SELECT 2"]))
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 0);
        assert_eq!(runner.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_begin_failure_reports_zero_completed() {
        let executor = QueryExecutor::new(Duration::from_secs(5));
        let pool = unreachable_pool();
        let failure = executor
            .run_transaction(&pool, &["SELECT 1".to_string()])
            .await
            .unwrap_err();
        assert_eq!(failure.completed, 0);
    }
}
