//! MCP server integration module.
//!
//! Bridges the MCP protocol and the CockroachDB tool handlers using the rmcp framework.

pub mod service;

pub use service::CrdbService;
