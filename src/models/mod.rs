//! Data models for the CockroachDB MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionConfigError, ConnectionDescriptor, ConnectionFields, DEFAULT_DATABASE, DEFAULT_HOST,
    DEFAULT_PORT, DEFAULT_USERNAME, SslMode,
};
pub use query::{
    ColumnMetadata, DEFAULT_HISTORY_LIMIT, QueryHistoryEntry, QueryParam, QueryResult, Row,
};
