//! Query execution plan tool.
//!
//! Wraps a statement in `EXPLAIN` or `EXPLAIN ANALYZE`. ANALYZE executes the statement,
//! so it has the same side effects as running it directly.

use crate::context::AppContext;
use crate::error::DbResult;
use crate::models::Row;
use crate::tools::sql_validator::{ensure_single_statement, strip_trailing_semicolons};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Input for the explain_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExplainInput {
    /// Statement to explain
    pub query: String,
    /// Execute the statement and include runtime statistics (EXPLAIN ANALYZE)
    #[serde(default)]
    pub analyze: bool,
}

/// Output from the explain_query tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExplainOutput {
    /// EXPLAIN result rows
    pub plan: Vec<Row>,
    /// Plan lines joined with newlines
    pub plan_text: String,
    pub analyzed: bool,
}

pub fn explain_sql(query: &str, analyze: bool) -> String {
    let keyword = if analyze { "EXPLAIN ANALYZE" } else { "EXPLAIN" };
    format!("{} {}", keyword, strip_trailing_semicolons(query))
}

/// Join the `info` column (or `plan` on older versions) of every row.
pub fn plan_text(rows: &[Row]) -> String {
    rows.iter()
        .map(|row| match row.get("info").or_else(|| row.get("plan")) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Handler for the explain tool.
#[derive(Debug, Clone)]
pub struct ExplainToolHandler {
    ctx: AppContext,
}

impl ExplainToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn explain(&self, input: ExplainInput) -> DbResult<ExplainOutput> {
        ensure_single_statement(&input.query)?;
        let sql = explain_sql(&input.query, input.analyze);
        let result = self.ctx.fetch(&sql, &[]).await?;
        debug!(analyze = input.analyze, lines = result.row_count(), "Explained query");

        Ok(ExplainOutput {
            plan_text: plan_text(&result.rows),
            plan: result.into_rows(),
            analyzed: input.analyze,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_explain_sql() {
        assert_eq!(explain_sql("SELECT * FROM users;", false), "EXPLAIN SELECT * FROM users");
        assert_eq!(
            explain_sql("SELECT * FROM users", true),
            "EXPLAIN ANALYZE SELECT * FROM users"
        );
    }

    #[test]
    fn test_plan_text_uses_info_column() {
        let rows = vec![
            row(json!({"info": "distribution: local"})),
            row(json!({"info": "vectorized: true"})),
            row(json!({"info": ""})),
            row(json!({"info": "• scan"})),
        ];
        assert_eq!(plan_text(&rows), "distribution: local\nvectorized: true\n\n• scan");
    }

    #[test]
    fn test_plan_text_falls_back_to_plan_column() {
        let rows = vec![row(json!({"plan": "scan users"})), row(json!({"other": 1}))];
        assert_eq!(plan_text(&rows), "scan users\n");
    }

    #[test]
    fn test_input_defaults() {
        let input: ExplainInput = serde_json::from_value(json!({"query": "SELECT 1"})).unwrap();
        assert!(!input.analyze);
    }
}
