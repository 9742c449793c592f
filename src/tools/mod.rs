//! MCP tool implementations.
//!
//! One handler per tool family:
//! - `database`: connect, switch and manage databases
//! - `table`: DDL for tables, indexes and views, bulk import
//! - `schema`: read-only schema introspection
//! - `query`: ad-hoc statements and query history
//! - `transaction`: atomic multi-statement execution
//! - `explain`: query plans
//! - `cluster`: node, query and replication monitoring
//!
//! Every tool replies with a [`ToolResponse`] envelope.

pub mod cluster;
pub mod database;
pub mod explain;
pub mod format;
pub mod query;
pub mod schema;
pub mod sql_validator;
pub mod table;
pub mod transaction;

use schemars::JsonSchema;
use serde::Serialize;

pub use cluster::ClusterToolHandler;
pub use database::DatabaseToolHandler;
pub use explain::ExplainToolHandler;
pub use format::OutputFormat;
pub use query::QueryToolHandler;
pub use schema::SchemaToolHandler;
pub use table::TableToolHandler;
pub use transaction::TransactionToolHandler;

/// `{success, ...payload}` on success, `{success: false, error, ...}` on failure.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ToolResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ToolResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Failure that still carries partial payload (durations, progress counters).
    pub fn failure_with(error: impl Into<String>, data: T) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

/// Payload for tools that only report what they did.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct MessageOutput {
    pub message: String,
}

impl MessageOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
