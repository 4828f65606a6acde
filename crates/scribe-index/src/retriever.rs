//! Query-side retrieval: search, hydrate from live files, dedupe, re-rank.

use std::collections::{HashMap, HashSet};

use scribe_llm::LlmProvider;
use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkerConfig, blake3_hex, chunk};
use crate::corpus::Corpus;
use crate::embedder::EmbeddingClient;
use crate::error::{IndexError, Result};
use crate::store::{ChunkHit, ChunkStore, SearchFilters};

/// Secondary bonuses added to the raw similarity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Bonus reached once the hydrated text is `length_cap_chars` long.
    pub length_bonus_max: f32,
    pub length_cap_chars: usize,
    /// Bonus for chunks with a non-empty section path.
    pub section_bonus: f32,
    /// Bonus when every query term appears in the chunk.
    pub term_overlap_max: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            length_bonus_max: 0.1,
            length_cap_chars: 500,
            section_bonus: 0.05,
            term_overlap_max: 0.1,
        }
    }
}

impl RankingWeights {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn length_bonus(&self, char_length: usize) -> f32 {
        if self.length_cap_chars == 0 {
            return self.length_bonus_max;
        }
        let ratio = char_length.min(self.length_cap_chars) as f32 / self.length_cap_chars as f32;
        self.length_bonus_max * ratio
    }

    #[must_use]
    pub fn section_bonus(&self, section_path: &[String]) -> f32 {
        if section_path.is_empty() {
            0.0
        } else {
            self.section_bonus
        }
    }

    /// `term_overlap_max` scaled by the fraction of distinct query terms
    /// present as tokens in `text`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn term_overlap_bonus(&self, query_terms: &HashSet<String>, text: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms = terms(text);
        let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
        self.term_overlap_max * hits as f32 / query_terms.len() as f32
    }

    /// Raw similarity plus every bonus for the hydrated `chunk`.
    #[must_use]
    pub fn composite(&self, similarity: f32, chunk: &Chunk, query_terms: &HashSet<String>) -> f32 {
        similarity
            + self.length_bonus(chunk.char_length)
            + self.section_bonus(&chunk.section_path)
            + self.term_overlap_bonus(query_terms, &chunk.text)
    }
}

/// A chunk with up-to-date text and its ranking data.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub base_similarity: f32,
    pub composite_score: f32,
    pub content_fingerprint: String,
}

/// Read-only retrieval pipeline over the chunk index and the live corpus.
pub struct Retriever<P> {
    corpus: Corpus,
    chunker: ChunkerConfig,
    embedder: EmbeddingClient<P>,
    store: ChunkStore,
    weights: RankingWeights,
}

impl<P: LlmProvider> Retriever<P> {
    /// `chunker` must match the configuration used at indexing time so
    /// positions resolve to the same chunks.
    #[must_use]
    pub fn new(
        corpus: Corpus,
        chunker: ChunkerConfig,
        embedder: EmbeddingClient<P>,
        store: ChunkStore,
        weights: RankingWeights,
    ) -> Self {
        Self {
            corpus,
            chunker,
            embedder,
            store,
            weights,
        }
    }

    /// Up to `top_k` chunks relevant to `query`, best first.
    ///
    /// # Errors
    ///
    /// [`crate::IndexError::EmbeddingUnavailable`] if the query cannot be
    /// embedded, [`crate::IndexError::VectorIndexUnavailable`] if search fails.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        self.retrieve_filtered(query, top_k, min_similarity, &SearchFilters::default())
            .await
    }

    /// [`Self::retrieve`] restricted by exact-match metadata filters.
    ///
    /// # Errors
    ///
    /// Same as [`Self::retrieve`].
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        let candidates = self
            .store
            .search(vector, top_k.saturating_mul(2), filters, min_similarity)
            .await?;
        let candidate_count = candidates.len();

        let hydrated = self.hydrate(candidates).await;

        let query_terms = terms(query);
        let mut seen = HashSet::new();
        let mut results: Vec<RetrievedChunk> = hydrated
            .into_iter()
            .filter_map(|(hit, chunk)| {
                let content_fingerprint = fingerprint(&chunk.text);
                if !seen.insert(content_fingerprint.clone()) {
                    tracing::debug!(file = %chunk.file_path, position = chunk.position_index, "duplicate content dropped");
                    return None;
                }
                let composite_score = self.weights.composite(hit.similarity, &chunk, &query_terms);
                Some(RetrievedChunk {
                    chunk,
                    base_similarity: hit.similarity,
                    composite_score,
                    content_fingerprint,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| b.base_similarity.total_cmp(&a.base_similarity))
                .then_with(|| a.chunk.position_index.cmp(&b.chunk.position_index))
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
        });
        results.truncate(top_k);

        tracing::debug!(
            candidates = candidate_count,
            returned = results.len(),
            "retrieval finished"
        );
        Ok(results)
    }

    /// Replace stored text with the live chunk at the same position,
    /// dropping candidates whose file or position is gone.
    async fn hydrate(&self, candidates: Vec<ChunkHit>) -> Vec<(ChunkHit, Chunk)> {
        let mut files: HashMap<String, Option<Vec<Chunk>>> = HashMap::new();
        let mut out = Vec::with_capacity(candidates.len());

        for hit in candidates {
            if !files.contains_key(&hit.file_path) {
                let chunks = match self.load_chunks(&hit.file_path).await {
                    Ok(chunks) => Some(chunks),
                    Err(e) => {
                        tracing::warn!(file = %hit.file_path, "hydration skipped file: {e}");
                        None
                    }
                };
                files.insert(hit.file_path.clone(), chunks);
            }
            let live = files
                .get(&hit.file_path)
                .and_then(Option::as_ref)
                .and_then(|chunks| chunks.get(hit.position_index));
            match live {
                Some(chunk) => {
                    let chunk = chunk.clone();
                    out.push((hit, chunk));
                }
                None => tracing::warn!(
                    file = %hit.file_path,
                    position = hit.position_index,
                    "stale index entry dropped: source chunk no longer exists"
                ),
            }
        }
        out
    }

    async fn load_chunks(&self, rel_path: &str) -> Result<Vec<Chunk>> {
        let path = self.corpus.resolve(rel_path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::SourceFileMissing(rel_path.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        Ok(chunk(&text, rel_path, &self.chunker).collect())
    }
}

/// Lowercase alphanumeric tokens.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Hash of the text lowercased with runs of whitespace collapsed.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    blake3_hex(&normalized)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use scribe_llm::mock::MockProvider;
    use scribe_memory::InMemoryVectorStore;
    use scribe_memory::sqlite::SqliteStore;

    use super::*;
    use crate::checksum::ChecksumStore;
    use crate::embedder::EmbeddingConfig;
    use crate::indexer::{Indexer, IndexerConfig};

    struct Fixture {
        dir: tempfile::TempDir,
        indexer: Indexer<MockProvider>,
        retriever: Retriever<MockProvider>,
    }

    async fn fixture(mock: MockProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        let corpus = Corpus::new(dir.path(), &[]);
        let embedder = EmbeddingClient::new(
            Arc::new(mock),
            EmbeddingConfig {
                initial_backoff: Duration::from_millis(1),
                ..EmbeddingConfig::default()
            },
        );
        let store = ChunkStore::new(
            Arc::new(InMemoryVectorStore::new()),
            "test",
            Duration::from_secs(5),
        );
        let indexer = Indexer::new(
            corpus.clone(),
            ChecksumStore::new(sqlite.pool().clone()),
            embedder.clone(),
            store.clone(),
            IndexerConfig::default(),
        );
        let retriever = Retriever::new(
            corpus,
            ChunkerConfig::default(),
            embedder,
            store,
            RankingWeights::default(),
        );
        Fixture {
            dir,
            indexer,
            retriever,
        }
    }

    fn write(f: &Fixture, name: &str, body: &str) {
        std::fs::write(f.dir.path().join(name), body).unwrap();
    }

    #[tokio::test]
    async fn alpha_query_prefers_alpha_section() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "notes.md", "## A\nalpha content here\n\n## B\nbeta content here\n");
        f.indexer.index_all(false).await.unwrap();

        let all = f.retriever.retrieve("alpha", 5, 0.0).await.unwrap();
        let a = all.iter().find(|r| r.chunk.section_path == ["A"]).unwrap();
        let b = all.iter().find(|r| r.chunk.section_path == ["B"]).unwrap();
        assert!(a.base_similarity > b.base_similarity);

        let top = f.retriever.retrieve("alpha", 1, 0.0).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].chunk.section_path, ["A"]);
        assert_eq!(top[0].chunk.text, "alpha content here");
    }

    #[tokio::test]
    async fn zero_top_k_skips_embedding() {
        let mock = MockProvider::default();
        let f = fixture(mock.clone()).await;
        assert!(f.retriever.retrieve("alpha", 0, 0.0).await.unwrap().is_empty());
        assert_eq!(mock.embed_calls(), 0);
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let f = fixture(MockProvider::default()).await;
        assert!(f.retriever.retrieve("alpha", 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_outage_is_an_error() {
        let f = fixture(MockProvider::default().fail_embed_on("alpha")).await;
        let err = f.retriever.retrieve("alpha", 5, 0.0).await.unwrap_err();
        assert!(matches!(
            err,
            crate::IndexError::EmbeddingUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn duplicate_content_is_returned_once() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "one.md", "# One\nshared paragraph about rust\n");
        write(&f, "two.md", "# One\nshared paragraph about rust\n");
        f.indexer.index_all(false).await.unwrap();

        let results = f.retriever.retrieve("rust", 5, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn hydration_uses_live_text_and_drops_missing_files() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "live.md", "# Live\nalpha original text\n");
        write(&f, "gone.md", "# Gone\nalpha doomed text\n");
        f.indexer.index_all(false).await.unwrap();

        // Edit without reindexing; remove the other file.
        write(&f, "live.md", "# Live\nalpha edited text\n");
        std::fs::remove_file(f.dir.path().join("gone.md")).unwrap();

        let results = f.retriever.retrieve("alpha", 5, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "live.md");
        assert_eq!(results[0].chunk.text, "alpha edited text");
    }

    #[tokio::test]
    async fn positions_beyond_live_file_are_dropped() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha one\n# B\nalpha two\n");
        f.indexer.index_all(false).await.unwrap();
        write(&f, "a.md", "# A\nalpha one\n");

        let results = f.retriever.retrieve("alpha", 5, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.position_index, 0);
    }

    #[tokio::test]
    async fn min_similarity_is_a_hard_floor() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "notes.md", "## A\nalpha content here\n\n## B\nbeta content here\n");
        f.indexer.index_all(false).await.unwrap();

        let results = f.retriever.retrieve("alpha", 5, 0.99).await.unwrap();
        assert!(results.iter().all(|r| r.base_similarity >= 0.99));
    }

    #[tokio::test]
    async fn filters_restrict_to_file() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha here\n");
        write(&f, "b.txt", "alpha there");
        f.indexer.index_all(false).await.unwrap();

        let filters = SearchFilters {
            content_type: Some("text".into()),
            ..SearchFilters::default()
        };
        let results = f
            .retriever
            .retrieve_filtered("alpha", 5, 0.0, &filters)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "b.txt");
    }

    #[test]
    fn section_bonus_requires_headings() {
        let w = RankingWeights::default();
        assert!((w.section_bonus(&["A".into()]) - 0.05).abs() < f32::EPSILON);
        assert!(w.section_bonus(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn term_overlap_is_case_insensitive_fraction() {
        let w = RankingWeights::default();
        let q = terms("Alpha Beta");
        let half = w.term_overlap_bonus(&q, "ALPHA only");
        assert!((half - 0.05).abs() < 1e-6);
        assert!(w.term_overlap_bonus(&HashSet::new(), "alpha").abs() < f32::EPSILON);
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        assert_eq!(fingerprint("Hello   World\n"), fingerprint("hello world"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello there"));
    }

    #[tokio::test]
    async fn missing_source_is_a_typed_error() {
        let f = fixture(MockProvider::default()).await;
        let err = f.retriever.load_chunks("absent.md").await.unwrap_err();
        assert!(matches!(err, IndexError::SourceFileMissing(ref p) if p == "absent.md"));
    }

    fn filler_chunk(words: usize) -> Chunk {
        let text = vec!["filler"; words.max(1)].join(" ");
        Chunk {
            id: String::new(),
            file_path: "a.md".into(),
            section_path: vec!["Guide".into()],
            position_index: 0,
            char_length: text.chars().count(),
            content_hash: String::new(),
            text,
        }
    }

    proptest! {
        #[test]
        fn longer_chunk_never_ranks_below_shorter(
            similarity in 0.0f32..1.0,
            a in 1usize..200,
            b in 1usize..200,
        ) {
            let w = RankingWeights::default();
            let query = terms("alpha filler");
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            let short = filler_chunk(short);
            let long = filler_chunk(long);
            prop_assert_eq!(
                w.term_overlap_bonus(&query, &short.text),
                w.term_overlap_bonus(&query, &long.text)
            );
            prop_assert!(w.composite(similarity, &long, &query) >= w.composite(similarity, &short, &query));
        }

        #[test]
        fn length_bonus_is_monotonic_and_bounded(a in 0usize..2000, b in 0usize..2000) {
            let w = RankingWeights::default();
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(w.length_bonus(short) <= w.length_bonus(long));
            prop_assert!(w.length_bonus(long) <= w.length_bonus_max + f32::EPSILON);
            prop_assert!(w.length_bonus(short) >= 0.0);
        }
    }
}
