//! Question answering over the index: retrieve, prompt, generate, cite, score.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use scribe_index::{RetrievedChunk, Retriever};
use scribe_llm::LlmProvider;
use scribe_memory::sqlite::SqliteStore;
use scribe_memory::{Conversation, ConversationId, MemoryError, TurnRole};
use serde::{Deserialize, Serialize};

use crate::context::{build_prompt, format_context};
use crate::error::QueryError;

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[source:\s*([^\]]+?)\s*\]").unwrap());

/// Chunks whose similarity feeds the mean in [`ConfidenceWeights::score`].
const SIMILARITY_WINDOW: usize = 5;

/// Blend of retrieval signals into a `[0, 1]` confidence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    /// Weight of the mean similarity of the top chunks.
    pub similarity: f32,
    /// Weight of distinct source files relative to `coverage_target_files`.
    pub coverage: f32,
    /// Weight of total context length relative to `context_target_chars`.
    pub context_length: f32,
    pub coverage_target_files: usize,
    pub context_target_chars: usize,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            coverage: 0.2,
            context_length: 0.1,
            coverage_target_files: 5,
            context_target_chars: 5000,
        }
    }
}

impl ConfidenceWeights {
    /// Zero when nothing was retrieved.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, chunks: &[RetrievedChunk]) -> f32 {
        if chunks.is_empty() {
            return 0.0;
        }
        let top = &chunks[..chunks.len().min(SIMILARITY_WINDOW)];
        let mean_similarity =
            top.iter().map(|c| c.base_similarity).sum::<f32>() / top.len() as f32;

        let files: HashSet<&str> = chunks.iter().map(|c| c.chunk.file_path.as_str()).collect();
        let coverage = ratio(files.len(), self.coverage_target_files);

        let context_chars: usize = chunks.iter().map(|c| c.chunk.char_length).sum();
        let context = ratio(context_chars, self.context_target_chars);

        let score = self.similarity * mean_similarity.clamp(0.0, 1.0)
            + self.coverage * coverage
            + self.context_length * context;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(value: usize, target: usize) -> f32 {
    if target == 0 {
        return 1.0;
    }
    (value as f32 / target as f32).min(1.0)
}

/// File paths cited as `[source: <path>]`, in order of first appearance.
#[must_use]
pub fn extract_citations(reply: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CITATION_RE
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|path| !path.is_empty())
        .map(str::to_owned)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Prior turns included in the prompt.
    pub max_turns: usize,
    pub min_similarity: f32,
    pub confidence: ConfidenceWeights,
    pub generation_timeout: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_turns: 5,
            min_similarity: 0.0,
            confidence: ConfidenceWeights::default(),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

/// Result of [`QueryEngine::ask`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f32,
    pub conversation_id: ConversationId,
    /// Retrieved chunks placed in the prompt.
    pub chunks_used: usize,
}

pub struct QueryEngine<P> {
    retriever: Arc<Retriever<P>>,
    generator: Arc<P>,
    conversations: SqliteStore,
    settings: QuerySettings,
}

impl<P: LlmProvider> QueryEngine<P> {
    #[must_use]
    pub fn new(
        retriever: Arc<Retriever<P>>,
        generator: Arc<P>,
        conversations: SqliteStore,
        settings: QuerySettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            conversations,
            settings,
        }
    }

    #[must_use]
    pub fn conversations(&self) -> &SqliteStore {
        &self.conversations
    }

    /// Answer `question` from the index, continuing `conversation_id` when
    /// given and starting a new conversation otherwise.
    ///
    /// # Errors
    ///
    /// [`QueryError::ConversationNotFound`] for an unknown id,
    /// [`QueryError::Retrieval`] when embedding or search fails,
    /// [`QueryError::Generation`] or [`QueryError::GenerationTimeout`] when the
    /// generator fails. Nothing is recorded in the conversation on error.
    pub async fn ask(
        &self,
        question: &str,
        conversation_id: Option<ConversationId>,
        max_sources: usize,
    ) -> Result<Answer, QueryError> {
        let start = Instant::now();

        let conversation = match conversation_id {
            Some(id) => Some(self.load(id).await?),
            None => None,
        };
        let history = conversation
            .as_ref()
            .map(|c| format_context(c, self.settings.max_turns))
            .unwrap_or_default();

        let chunks = self
            .retriever
            .retrieve(question, max_sources, self.settings.min_similarity)
            .await?;
        if chunks.is_empty() {
            tracing::info!("no relevant context found");
        }

        let messages = build_prompt(question, &chunks, &history);
        let timeout = self.settings.generation_timeout;
        let answer = match tokio::time::timeout(timeout, self.generator.chat(&messages)).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(QueryError::GenerationTimeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        let sources = extract_citations(&answer);
        let confidence = self.settings.confidence.score(&chunks);

        let id = match conversation {
            Some(c) => c.id,
            None => self.conversations.create_conversation().await?,
        };
        self.append(id, TurnRole::User, question, &[]).await?;
        self.append(id, TurnRole::Assistant, &answer, &sources).await?;

        tracing::info!(
            conversation = %id,
            chunks = chunks.len(),
            sources = sources.len(),
            confidence,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "question answered"
        );

        Ok(Answer {
            answer,
            sources,
            confidence,
            conversation_id: id,
            chunks_used: chunks.len(),
        })
    }

    async fn load(&self, id: ConversationId) -> Result<Conversation, QueryError> {
        match self.conversations.load_conversation(id).await {
            Ok(c) => Ok(c),
            Err(MemoryError::NotFound { .. }) => Err(QueryError::ConversationNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(
        &self,
        id: ConversationId,
        role: TurnRole,
        text: &str,
        sources: &[String],
    ) -> Result<(), QueryError> {
        match self.conversations.append_turn(id, role, text, sources).await {
            Ok(_) => Ok(()),
            Err(MemoryError::NotFound { .. }) => Err(QueryError::ConversationNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}
