//! Transaction tool.
//!
//! Runs a list of statements atomically. The first failure rolls everything back and
//! stops; later statements are never sent. Each entry must be one statement, and
//! transaction control (`BEGIN`, `COMMIT`, `SAVEPOINT`, ...) is rejected before connecting.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::models::Row;
use crate::tools::ToolResponse;
use crate::tools::sql_validator::ensure_transaction_statement;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Input for the execute_transaction tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteTransactionInput {
    /// Statements to run in order inside one transaction
    pub queries: Vec<String>,
}

/// Rows produced by one statement of the transaction.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StatementResult {
    pub query: String,
    pub row_count: usize,
    pub rows: Vec<Row>,
}

/// Output from the execute_transaction tool.
///
/// Success carries `results` and `message`; failure carries the progress counters.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct ExecuteTransactionOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<StatementResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_statements: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_statements: Option<usize>,
}

/// Handler for the transaction tool.
#[derive(Debug, Clone)]
pub struct TransactionToolHandler {
    ctx: AppContext,
}

impl TransactionToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn execute_transaction(
        &self,
        input: ExecuteTransactionInput,
    ) -> DbResult<ToolResponse<ExecuteTransactionOutput>> {
        let total = input.queries.len();
        if total == 0 {
            return Err(DbError::invalid_input("At least one query is required"));
        }
        for (idx, query) in input.queries.iter().enumerate() {
            ensure_transaction_statement(query).map_err(|e| {
                DbError::invalid_input(format!("Query {}: {}", idx + 1, e.tool_message()))
            })?;
        }

        let pool = self.ctx.pool().await?;
        match self.ctx.executor.run_transaction(&pool, &input.queries).await {
            Ok(results) => {
                info!(statements = total, "Transaction committed");
                let results = input
                    .queries
                    .into_iter()
                    .zip(results)
                    .map(|(query, result)| StatementResult {
                        query,
                        row_count: result.row_count(),
                        rows: result.into_rows(),
                    })
                    .collect();
                Ok(ToolResponse::ok(ExecuteTransactionOutput {
                    results: Some(results),
                    message: Some(format!(
                        "Transaction completed successfully with {} statements",
                        total
                    )),
                    ..Default::default()
                }))
            }
            Err(failure) => {
                warn!(
                    completed = failure.completed,
                    total,
                    error = %failure.error,
                    "Transaction rolled back"
                );
                Ok(ToolResponse::failure_with(
                    failure.error.tool_message(),
                    ExecuteTransactionOutput {
                        completed_statements: Some(failure.completed),
                        total_statements: Some(total),
                        ..Default::default()
                    },
                ))
            }
        }
    }
}
