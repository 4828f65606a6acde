//! Storage layer for scribe: a vector store abstraction (Qdrant or in-memory)
//! and SQLite persistence for conversations and per-file index state.

pub mod error;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod sqlite;
pub mod types;
pub mod vector_store;

pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use types::{Conversation, ConversationId, ConversationTurn, TurnRole};
pub use vector_store::{
    FieldCondition, FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};
