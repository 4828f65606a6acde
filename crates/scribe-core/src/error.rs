use scribe_index::IndexError;
use scribe_llm::LlmError;
use scribe_memory::{ConversationId, MemoryError};

/// Failures of a question-answering call.
///
/// An empty retrieval is not an error: it produces a low-confidence answer.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Embedding or vector search failed.
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("text generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("text generation timed out after {seconds}s")]
    GenerationTimeout { seconds: u64 },

    #[error("conversation storage error: {0}")]
    Memory(#[from] MemoryError),

    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
}
