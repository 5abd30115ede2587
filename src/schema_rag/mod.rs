//! Focused-Context Schema Retrieval
//!
//! Semantic store mapping query text to the table schemas relevant to it.

pub mod embedder;
pub mod retriever;
pub mod vector_store;

pub use embedder::{ApiEmbedder, Embedder, HashEmbedder};
pub use retriever::{ColumnInfo, SchemaEntry, SchemaIndex};
