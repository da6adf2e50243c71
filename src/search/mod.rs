//! Retrieval engine for Bear notes
//!
//! Keyword search over the note store, semantic search over a locally built
//! vector index, and the orchestrator that chooses between them.

pub mod embedding;
pub mod engine;
pub mod vectordb;

pub use embedding::{EmbeddingBackend, EmbeddingProvider, HtpModel};
pub use engine::{Capability, Retriever, SearchOutcome, Strategy};
pub use vectordb::VectorIndex;
