//! Configuration, prompt assembly, and the question-answering engine.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod query;

pub use error::QueryError;
pub use query::{Answer, ConfidenceWeights, QueryEngine, QuerySettings};
