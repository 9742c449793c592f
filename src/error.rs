//! Error taxonomy for the CockroachDB MCP Server.
//!
//! Every fallible operation below the MCP layer returns [`DbResult`]. Variants carry a
//! suggestion where the agent can act on it (reconnect, retry the transaction, fix a name).

use serde_json::{Value as JsonValue, json};
use thiserror::Error;

/// SQLSTATE codes that get a CockroachDB-specific hint.
const SERIALIZATION_FAILURE: &str = "40001";
const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_DATABASE: &str = "3D000";
const SYNTAX_ERROR: &str = "42601";
const INVALID_PASSWORD: &str = "28P01";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Not connected to database: {reason}")]
    NotConnected { reason: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// How a [`DbError`] is surfaced as a JSON-RPC error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcCategory {
    InvalidParams,
    ResourceNotFound,
    Internal,
}

impl DbError {
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn not_connected(reason: impl Into<String>) -> Self {
        Self::NotConnected {
            reason: reason.into(),
        }
    }

    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// What the agent can do about this error, if anything.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } | Self::Database { suggestion, .. } => {
                Some(suggestion)
            }
            Self::NotConnected { .. } => {
                Some("Call connect or connect_database to establish a connection")
            }
            Self::Timeout { .. } => {
                Some("Raise --command-timeout or narrow the statement")
            }
            _ => None,
        }
    }

    /// The "no pool available" guard. Propagated as a protocol error rather than
    /// folded into a `success: false` payload.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// Text for the `error` field of a `success: false` tool reply.
    ///
    /// Validation failures are reported verbatim; everything else keeps its category prefix.
    pub fn tool_message(&self) -> String {
        match self {
            Self::InvalidInput { message } => message.clone(),
            other => other.to_string(),
        }
    }

    fn rpc_category(&self) -> RpcCategory {
        match self {
            Self::InvalidInput { .. } | Self::Schema { .. } | Self::Database { .. } => {
                RpcCategory::InvalidParams
            }
            Self::NotConnected { .. } => RpcCategory::ResourceNotFound,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Internal { .. } => {
                RpcCategory::Internal
            }
        }
    }

    /// Message for the JSON-RPC error; database errors carry their SQLSTATE.
    fn rpc_message(&self) -> String {
        match self {
            Self::Database {
                message,
                sql_state: Some(code),
                ..
            } => format!("{} (SQLSTATE: {})", message, code),
            Self::Database { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn sql_state_suggestion(code: Option<&str>) -> &'static str {
    match code {
        Some(SERIALIZATION_FAILURE) => {
            "Transaction contention: retry the statement or the whole transaction"
        }
        Some(UNDEFINED_TABLE) => "Check the table name with list_tables",
        Some(UNDEFINED_DATABASE) => "Check the database name with list_databases",
        Some(SYNTAX_ERROR) => "Check the SQL syntax",
        Some(INVALID_PASSWORD) => "Verify the username and password",
        _ => "Check the SQL syntax and referenced objects",
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;

        match err {
            E::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let suggestion = sql_state_suggestion(code.as_deref());
                DbError::database(db_err.message(), code, suggestion)
            }
            E::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Check that the cluster is reachable, or raise --acquire-timeout",
            ),
            E::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "Reconnect with connect or connect_database",
            ),
            E::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection URL format and credentials",
            ),
            E::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and that the CockroachDB node is running",
            ),
            E::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify the ssl mode and certificate paths",
            ),
            E::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check CockroachDB server compatibility",
            ),
            E::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col)
            }
            E::TypeNotFound { type_name } => {
                DbError::schema(format!("Type not found: {}", type_name), type_name)
            }
            E::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            other => DbError::internal(format!("Unexpected driver error: {}", other)),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data: Option<JsonValue> = err.suggestion().map(|s| json!({ "suggestion": s }));
        let message = err.rpc_message();
        match err.rpc_category() {
            RpcCategory::InvalidParams => rmcp::ErrorData::invalid_params(message, data),
            RpcCategory::ResourceNotFound => rmcp::ErrorData::resource_not_found(message, data),
            RpcCategory::Internal => rmcp::ErrorData::internal_error(message, data),
        }
    }
}
