//! Per-process application context.
//!
//! Built once at startup and cloned into every MCP service instance. All clones share the
//! same pool manager and query history.

use crate::config::PoolOptions;
use crate::db::{PoolManager, QueryExecutor, QueryHistory};
use crate::error::DbResult;
use crate::models::{ConnectionDescriptor, QueryParam, QueryResult};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub pools: Arc<PoolManager>,
    pub history: Arc<QueryHistory>,
    pub executor: QueryExecutor,
}

impl AppContext {
    /// Context backed by real sqlx pools for the startup descriptor.
    pub fn new(configured: Option<ConnectionDescriptor>, options: PoolOptions) -> Self {
        Self::from_manager(Arc::new(PoolManager::new(configured, options)))
    }

    pub fn from_manager(pools: Arc<PoolManager>) -> Self {
        let executor = QueryExecutor::new(pools.command_timeout());
        Self {
            pools,
            history: Arc::new(QueryHistory::new()),
            executor,
        }
    }

    pub async fn pool(&self) -> DbResult<PgPool> {
        self.pools.get_pool().await
    }

    /// Run a row-returning statement on the live pool.
    pub async fn fetch(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let pool = self.pool().await?;
        self.executor.fetch(&pool, sql, params).await
    }

    /// Run a statement for its side effect on the live pool.
    pub async fn execute(&self, sql: &str) -> DbResult<u64> {
        let pool = self.pool().await?;
        self.executor.execute(&pool, sql, &[]).await
    }

    /// Close the live pool. Called once on shutdown.
    pub async fn shutdown(&self) {
        self.pools.close().await;
    }
}
