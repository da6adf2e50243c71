//! bear-retrieval library
//!
//! Read-only keyword and semantic search over a local Bear notes database.
//!
//! # Modules
//!
//! - `core`: Configuration, note model and the read-only note store
//! - `search`: Embedding provider, vector index and retrieval orchestrator
//! - `ops`: Closed set of caller-facing operations and their dispatch
//! - `mcp`: MCP server exposing the operations as tools

pub mod core;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod ops;
pub mod search;

// Re-exports for convenience
pub use core::config::Config;
pub use core::note::Note;
pub use core::paths::DataPaths;
pub use core::store::{NoteSource, NoteStore};
pub use ops::{dispatch, Operation, OperationOutput};
pub use search::engine::{Capability, RetrievalError, Retriever, Strategy};
