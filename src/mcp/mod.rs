//! MCP Server for Bear notes
//!
//! Exposes the retrieval operations as MCP tools over stdio.

mod server;

pub use server::run_mcp_server;
