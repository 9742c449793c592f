//! Ad-hoc query tool and query history.
//!
//! `execute_query` runs any statement the caller supplies, optionally with bound parameters
//! and an appended `LIMIT`, and records every attempt in the shared history log.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_HISTORY_LIMIT, QueryHistoryEntry, QueryParam, Row};
use crate::tools::ToolResponse;
use crate::tools::format::OutputFormat;
use crate::tools::sql_validator::strip_trailing_semicolons;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Input for the execute_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// SQL statement to execute
    pub query: String,
    /// Positional parameters for $1, $2, ... placeholders
    #[serde(default)]
    pub params: Option<Vec<QueryParam>>,
    /// Output format: json (default), csv, table or markdown
    #[serde(default)]
    pub format: OutputFormat,
    /// Append `LIMIT n` to the statement
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Output from the execute_query tool. On failure only `duration` is set.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct ExecuteQueryOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Wall-clock duration in seconds
    pub duration: f64,
    /// Column names in result order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Rendered result for csv, table and markdown formats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_result: Option<String>,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryHistoryInput {
    /// Number of recent queries to return (default: 10)
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for QueryHistoryInput {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryHistoryOutput {
    /// Most recent first
    pub history: Vec<QueryHistoryEntry>,
    pub total_queries: usize,
}

/// Statement as sent to the server: trailing `;` removed and `LIMIT n` appended when asked.
pub fn apply_limit(query: &str, limit: Option<u32>) -> String {
    match limit.filter(|n| *n > 0) {
        Some(n) => format!("{} LIMIT {}", strip_trailing_semicolons(query), n),
        None => query.to_string(),
    }
}

/// Handler for the query tools.
#[derive(Debug, Clone)]
pub struct QueryToolHandler {
    ctx: AppContext,
}

impl QueryToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Run one statement and record it in the history.
    ///
    /// Statement failures and blank input come back as a `success: false` response carrying
    /// the duration, and are recorded too. Only the not-connected guard is returned as an
    /// error.
    pub async fn execute_query(
        &self,
        input: ExecuteQueryInput,
    ) -> DbResult<ToolResponse<ExecuteQueryOutput>> {
        if input.query.trim().is_empty() {
            let message = DbError::invalid_input("Query cannot be empty").tool_message();
            self.ctx
                .history
                .record(&input.query, 0.0, 0, Some(message.clone()))
                .await;
            warn!("Rejected empty query");
            return Ok(ToolResponse::failure_with(message, ExecuteQueryOutput::default()));
        }
        let sql = apply_limit(&input.query, input.limit);
        let params = input.params.unwrap_or_default();
        let start = Instant::now();

        let outcome = match self.ctx.pool().await {
            Ok(pool) => self.ctx.executor.fetch(&pool, &sql, &params).await,
            Err(e) if e.is_not_connected() => return Err(e),
            Err(e) => Err(e),
        };
        let duration = start.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                let row_count = result.row_count();
                self.ctx.history.record(&sql, duration, row_count, None).await;
                info!(row_count, duration_secs = duration, "Query executed");

                let formatted_result = input.format.render(&result.columns, &result.rows, duration);
                Ok(ToolResponse::ok(ExecuteQueryOutput {
                    columns: Some(result.column_names()),
                    row_count: Some(row_count),
                    rows: Some(result.into_rows()),
                    duration,
                    formatted_result,
                }))
            }
            Err(e) => {
                let message = e.tool_message();
                self.ctx
                    .history
                    .record(&sql, duration, 0, Some(message.clone()))
                    .await;
                warn!(error = %e, duration_secs = duration, "Query failed");
                Ok(ToolResponse::failure_with(
                    message,
                    ExecuteQueryOutput {
                        duration,
                        ..Default::default()
                    },
                ))
            }
        }
    }

    pub async fn query_history(&self, input: QueryHistoryInput) -> DbResult<QueryHistoryOutput> {
        Ok(QueryHistoryOutput {
            history: self.ctx.history.recent(input.limit).await,
            total_queries: self.ctx.history.len().await,
        })
    }
}
