//! Embedding and text-generation provider abstraction.
//!
//! The indexing and retrieval crates only ever talk to [`LlmProvider`]; the
//! concrete backend is picked at startup and wrapped in [`any::AnyProvider`].

pub mod any;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use error::LlmError;
pub use provider::LlmProvider;
