//! Tool handler behavior that does not need a running cluster.
//!
//! Handlers run against a pool manager whose factory counts pool creations. Either there is
//! no startup target at all, or the pool points at a closed local port.

use crdb_mcp_server::config::PoolOptions;
use crdb_mcp_server::context::AppContext;
use crdb_mcp_server::db::{PoolFactory, PoolManager};
use crdb_mcp_server::error::{DbError, DbResult};
use crdb_mcp_server::models::{ConnectionDescriptor, ConnectionFields};
use crdb_mcp_server::tools::database::{DatabaseNameInput, DatabaseToolHandler};
use crdb_mcp_server::tools::explain::{ExplainInput, ExplainToolHandler};
use crdb_mcp_server::tools::format::OutputFormat;
use crdb_mcp_server::tools::query::{ExecuteQueryInput, QueryHistoryInput, QueryToolHandler};
use crdb_mcp_server::tools::table::{
    BulkImportInput, ColumnDefinition, CreateTableInput, CreateViewInput, TableToolHandler,
};
use crdb_mcp_server::tools::transaction::{ExecuteTransactionInput, TransactionToolHandler};
use futures_util::future::BoxFuture;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Hands out lazy pools with a short acquire timeout, so queries against an unreachable
/// target fail quickly.
#[derive(Default)]
struct LazyFactory {
    created: AtomicUsize,
}

impl PoolFactory for LazyFactory {
    fn create<'a>(
        &'a self,
        descriptor: &'a ConnectionDescriptor,
    ) -> BoxFuture<'a, DbResult<PgPool>> {
        Box::pin(async move {
            self.created.fetch_add(1, Ordering::SeqCst);
            let options = PgConnectOptions::from_str(descriptor.url())?;
            Ok(PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(1))
                .connect_lazy_with(options))
        })
    }
}

/// Target on a port nothing listens on.
fn unreachable_target() -> ConnectionDescriptor {
    ConnectionFields {
        host: Some("127.0.0.1".to_string()),
        port: Some(1),
        ..Default::default()
    }
    .resolve()
    .unwrap()
}

/// Unreachable target whose startup database is `database`.
fn unreachable_target_on(database: &str) -> ConnectionDescriptor {
    ConnectionFields {
        host: Some("127.0.0.1".to_string()),
        port: Some(1),
        database: Some(database.to_string()),
        ..Default::default()
    }
    .resolve()
    .unwrap()
}

fn context(target: Option<ConnectionDescriptor>) -> (AppContext, Arc<LazyFactory>) {
    let factory = Arc::new(LazyFactory::default());
    let manager = PoolManager::with_factory(target, PoolOptions::default(), factory.clone());
    (AppContext::from_manager(Arc::new(manager)), factory)
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn query_input(query: &str) -> ExecuteQueryInput {
    ExecuteQueryInput {
        query: query.to_string(),
        params: None,
        format: OutputFormat::Json,
        limit: None,
    }
}

fn assert_invalid_input(err: DbError, needle: &str) {
    assert!(
        matches!(err, DbError::InvalidInput { .. }),
        "expected invalid input, got {:?}",
        err
    );
    assert!(err.to_string().contains(needle), "{}", err);
}

#[tokio::test]
async fn test_failed_query_is_recorded_in_history() {
    let (ctx, _) = context(Some(unreachable_target()));
    let handler = QueryToolHandler::new(ctx.clone());

    let response = handler
        .execute_query(ExecuteQueryInput {
            limit: Some(5),
            ..query_input("SELECT * FROM accounts;")
        })
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.error.is_some());
    assert!(response.data.unwrap().duration >= 0.0);

    let history = handler
        .query_history(QueryHistoryInput::default())
        .await
        .unwrap();
    assert_eq!(history.total_queries, 1);
    let entry = &history.history[0];
    assert_eq!(entry.query, "SELECT * FROM accounts LIMIT 5");
    assert!(!entry.success);
    assert_eq!(entry.row_count, 0);
    assert_eq!(entry.error, response.error);
}

#[tokio::test]
async fn test_history_is_newest_first_and_limited() {
    let (ctx, _) = context(Some(unreachable_target()));
    let handler = QueryToolHandler::new(ctx);

    for i in 0..3 {
        let _ = handler
            .execute_query(query_input(&format!("SELECT {}", i)))
            .await
            .unwrap();
    }

    let history = handler
        .query_history(QueryHistoryInput { limit: 2 })
        .await
        .unwrap();
    assert_eq!(history.total_queries, 3);
    let queries: Vec<_> = history.history.iter().map(|e| e.query.as_str()).collect();
    assert_eq!(queries, vec!["SELECT 2", "SELECT 1"]);
}

#[tokio::test]
async fn test_query_without_target_is_not_connected() {
    let (ctx, factory) = context(None);
    let handler = QueryToolHandler::new(ctx.clone());

    let err = handler.execute_query(query_input("SELECT 1")).await.unwrap_err();
    assert!(err.is_not_connected());
    assert!(ctx.history.is_empty().await);
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_query_is_rejected_and_recorded() {
    let (ctx, factory) = context(Some(unreachable_target()));
    let handler = QueryToolHandler::new(ctx.clone());

    let response = handler.execute_query(query_input("   ")).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Query cannot be empty"));
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);

    let history = handler
        .query_history(QueryHistoryInput::default())
        .await
        .unwrap();
    assert_eq!(history.total_queries, 1);
    let entry = &history.history[0];
    assert!(!entry.success);
    assert!(entry.duration >= 0.0);
    assert_eq!(entry.error.as_deref(), Some("Query cannot be empty"));
}

#[tokio::test]
async fn test_drop_default_database_never_touches_pool() {
    let (ctx, factory) = context(Some(unreachable_target()));
    let handler = DatabaseToolHandler::new(ctx);

    for name in ["defaultdb", "DefaultDB", "  DEFAULTDB  "] {
        let err = handler
            .drop_database(DatabaseNameInput {
                database_name: name.to_string(),
            })
            .await
            .unwrap_err();
        assert_invalid_input(err, "Cannot drop the default database.");
    }
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_drop_configured_database_before_first_use_switches_to_default() {
    let (ctx, factory) = context(Some(unreachable_target_on("bank")));
    let handler = DatabaseToolHandler::new(ctx.clone());
    assert!(ctx.pools.current_database().await.is_none());

    // The DROP itself fails against the closed port; the switch has already happened.
    let result = handler
        .drop_database(DatabaseNameInput {
            database_name: "Bank".to_string(),
        })
        .await;
    assert!(result.is_err());

    let descriptor = ctx.pools.descriptor().await.unwrap();
    assert_eq!(descriptor.database(), "defaultdb");
    assert_eq!(ctx.pools.current_database().await.as_deref(), Some("defaultdb"));
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_drop_other_database_keeps_binding() {
    let (ctx, _) = context(Some(unreachable_target_on("bank")));
    let result = DatabaseToolHandler::new(ctx.clone())
        .drop_database(DatabaseNameInput {
            database_name: "movr".to_string(),
        })
        .await;
    assert!(result.is_err());
    assert_eq!(ctx.pools.descriptor().await.unwrap().database(), "bank");
}

#[tokio::test]
async fn test_transaction_control_is_rejected_before_pool_use() {
    let (ctx, factory) = context(Some(unreachable_target()));
    let handler = TransactionToolHandler::new(ctx);

    let batches = [
        vec!["INSERT INTO t VALUES (1)", "COMMIT", "INSERT INTO t VALUES ('bad')"],
        vec!["BEGIN", "INSERT INTO t VALUES (1)"],
        vec!["INSERT INTO t VALUES (1)", "ROLLBACK"],
        vec!["SAVEPOINT cockroach_restart", "INSERT INTO t VALUES (1)"],
        vec!["INSERT INTO t VALUES (1); COMMIT"],
    ];
    for batch in batches {
        let err = handler
            .execute_transaction(ExecuteTransactionInput {
                queries: batch.iter().map(|q| q.to_string()).collect(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }), "{:?}", err);
    }
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ddl_validation_precedes_pool_use() {
    let (ctx, factory) = context(Some(unreachable_target()));
    let tables = TableToolHandler::new(ctx.clone());

    let err = tables
        .create_table(CreateTableInput {
            table_name: "users".to_string(),
            columns: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    let err = tables
        .create_table(CreateTableInput {
            table_name: "users".to_string(),
            columns: vec![ColumnDefinition {
                name: "id".to_string(),
                datatype: "INT; DROP TABLE users".to_string(),
                constraint: None,
            }],
        })
        .await
        .unwrap_err();
    assert_invalid_input(err, "separators");

    let err = tables
        .create_view(CreateViewInput {
            view_name: "v".to_string(),
            query: "DELETE FROM users".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    let err = tables
        .bulk_import(BulkImportInput {
            table_name: "users".to_string(),
            file_url: "ftp://files.example.com/users.csv".to_string(),
            format: "csv".to_string(),
            delimiter: ",".to_string(),
            skip_header: true,
        })
        .await
        .unwrap_err();
    assert_invalid_input(err, "Unsupported scheme: ftp");

    let err = tables
        .bulk_import(BulkImportInput {
            table_name: "users".to_string(),
            file_url: "s3://bucket/users.parquet".to_string(),
            format: "parquet".to_string(),
            delimiter: ",".to_string(),
            skip_header: true,
        })
        .await
        .unwrap_err();
    assert_invalid_input(err, "Unsupported format");

    let err = ExplainToolHandler::new(ctx.clone())
        .explain(ExplainInput {
            query: "SELECT 1; SELECT 2".to_string(),
            analyze: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    let err = TransactionToolHandler::new(ctx)
        .execute_transaction(ExecuteTransactionInput { queries: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));

    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_random_identifiers_never_panic() {
    let (ctx, factory) = context(None);
    let databases = DatabaseToolHandler::new(ctx.clone());
    let tables = TableToolHandler::new(ctx);

    let mut names: Vec<String> = (0..50).map(|i| random_string(i * 7)).collect();
    names.extend(
        [
            "",
            "   ",
            "\0",
            "'; DROP DATABASE defaultdb; --",
            "\"quoted\"",
            "ユーザー",
        ]
        .map(String::from),
    );

    for name in names {
        // Every call either fails validation or reaches the not-connected guard.
        let err = databases
            .create_database(DatabaseNameInput {
                database_name: name.clone(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_connected() || matches!(err, DbError::InvalidInput { .. }));

        let err = tables
            .create_view(CreateViewInput {
                view_name: name.clone(),
                query: format!("SELECT {}", name),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_connected() || matches!(err, DbError::InvalidInput { .. }));
    }
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
}
