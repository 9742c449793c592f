//! CockroachDB MCP Server Library
//!
//! MCP (Model Context Protocol) tools that let AI assistants inspect and operate a
//! CockroachDB cluster: connection management, schema introspection, query execution,
//! transactions, and cluster monitoring.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use context::AppContext;
pub use error::DbError;
pub use mcp::CrdbService;
