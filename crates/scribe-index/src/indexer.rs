//! Corpus indexing orchestrator: checksum → chunk → embed → upsert → commit.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use scribe_llm::LlmProvider;

use crate::checksum::{ChecksumStore, FileIndexState, file_checksum, unix_now};
use crate::chunker::{Chunk, ChunkerConfig, chunk, embedding_text};
use crate::corpus::{Corpus, content_type};
use crate::embedder::EmbeddingClient;
use crate::error::{IndexError, Result};
use crate::store::{ChunkStore, IndexEntry};

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files processed at once by [`Indexer::index_all`] (default: 5).
    pub concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            concurrency: 5,
        }
    }
}

/// Step of the per-file pipeline at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStage {
    Reading,
    Embedding,
    Upserting,
    Committing,
    Removing,
}

impl fmt::Display for IndexStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reading => "reading",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
            Self::Committing => "committing",
            Self::Removing => "removing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub file_path: String,
    pub stage: IndexStage,
    pub message: String,
}

/// Summary of an indexing run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_updated: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    pub errors: Vec<FileError>,
    pub duration_ms: u64,
}

enum FileOutcome {
    Skipped,
    Updated { chunks: usize },
    Removed,
    Untracked,
}

struct StageError {
    stage: IndexStage,
    error: IndexError,
}

trait AtStage<T> {
    fn at(self, stage: IndexStage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: IndexStage) -> std::result::Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

type LockRegistry = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

struct FileLease<'a> {
    registry: &'a LockRegistry,
    rel_path: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for FileLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks
            .get(&self.rel_path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.rel_path);
        }
    }
}

/// Keeps the vector index and checksum store consistent with the corpus.
///
/// The indexer is the only writer of both stores.
pub struct Indexer<P> {
    corpus: Corpus,
    checksums: ChecksumStore,
    embedder: EmbeddingClient<P>,
    store: ChunkStore,
    config: IndexerConfig,
    file_locks: LockRegistry,
}

impl<P: LlmProvider> Indexer<P> {
    #[must_use]
    pub fn new(
        corpus: Corpus,
        checksums: ChecksumStore,
        embedder: EmbeddingClient<P>,
        store: ChunkStore,
        config: IndexerConfig,
    ) -> Self {
        Self {
            corpus,
            checksums,
            embedder,
            store,
            config,
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    #[must_use]
    pub fn checksums(&self) -> &ChecksumStore {
        &self.checksums
    }

    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Index every file in the corpus and clean up files that disappeared.
    ///
    /// Per-file failures are isolated and reported in [`IndexReport::errors`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::VectorIndexUnavailable`] if the vector engine
    /// fails, or a database error if tracked files cannot be listed.
    pub async fn index_all(&self, force: bool) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let files = self.corpus.walk();
        let total = files.len();
        tracing::info!(total, force, "indexing started");

        let current: HashSet<String> = files.iter().map(|f| f.rel_path.clone()).collect();

        let mut results = futures::stream::iter(files)
            .map(|f| async move {
                let outcome = self.process_file(&f.rel_path, force).await;
                (f.rel_path, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some((rel_path, outcome)) = results.next().await {
            report.files_scanned += 1;
            self.tally(&mut report, rel_path, outcome)?;
        }
        drop(results);

        for state in self.checksums.list().await? {
            if current.contains(&state.file_path) {
                continue;
            }
            let outcome = self.remove_tracked(&state.file_path).await;
            self.tally(&mut report, state.file_path, outcome)?;
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            scanned = report.files_scanned,
            updated = report.files_updated,
            skipped = report.files_skipped,
            removed = report.files_removed,
            chunks = report.chunks_written,
            errors = report.errors.len(),
            elapsed_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Index one file, given as an absolute path or relative to the corpus
    /// root. A path that no longer exists is removed from the index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::VectorIndexUnavailable`] if the vector engine fails.
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();
        let Some(rel_path) = self.corpus.relative(path) else {
            tracing::warn!(path = %path.display(), "outside the corpus root, ignored");
            return Ok(report);
        };

        if self.corpus.is_indexable(&self.corpus.resolve(&rel_path)) {
            report.files_scanned = 1;
            let outcome = self.process_file(&rel_path, force).await;
            self.tally(&mut report, rel_path, outcome)?;
        } else {
            tracing::debug!(file = %rel_path, "not indexable, ignored");
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }

    fn tally(
        &self,
        report: &mut IndexReport,
        file_path: String,
        outcome: std::result::Result<FileOutcome, StageError>,
    ) -> Result<()> {
        match outcome {
            Ok(FileOutcome::Skipped) => report.files_skipped += 1,
            Ok(FileOutcome::Updated { chunks }) => {
                report.files_updated += 1;
                report.chunks_written += chunks;
            }
            Ok(FileOutcome::Removed) => report.files_removed += 1,
            Ok(FileOutcome::Untracked) => {}
            Err(StageError {
                error: error @ IndexError::VectorIndexUnavailable(_),
                stage,
            }) => {
                tracing::error!(file = %file_path, %stage, "vector index unavailable: {error}");
                return Err(error);
            }
            Err(StageError { stage, error }) => {
                tracing::warn!(file = %file_path, %stage, "indexing failed: {error}");
                report.errors.push(FileError {
                    file_path,
                    stage,
                    message: error.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Serialize work on `rel_path`. The registry entry is dropped again
    /// once no task holds or waits on it.
    async fn lock_file(&self, rel_path: &str) -> FileLease<'_> {
        let lock = {
            let mut locks = self
                .file_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(rel_path.to_owned()).or_default())
        };
        FileLease {
            registry: &self.file_locks,
            rel_path: rel_path.to_owned(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn process_file(
        &self,
        rel_path: &str,
        force: bool,
    ) -> std::result::Result<FileOutcome, StageError> {
        let _lease = self.lock_file(rel_path).await;

        let abs_path = self.corpus.resolve(rel_path);
        let bytes = match tokio::fs::read(&abs_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(file = %rel_path, "file vanished, removing from index");
                return self.remove_locked(rel_path).await;
            }
            Err(e) => return Err(IndexError::Io(e)).at(IndexStage::Reading),
        };

        let checksum = file_checksum(&bytes);
        if !force
            && let Some(state) = self.checksums.get(rel_path).await.at(IndexStage::Reading)?
            && state.checksum == checksum
        {
            tracing::debug!(file = %rel_path, "unchanged, skipped");
            return Ok(FileOutcome::Skipped);
        }

        let text = String::from_utf8_lossy(&bytes);
        let chunks: Vec<Chunk> = chunk(&text, rel_path, &self.config.chunker).collect();
        tracing::debug!(file = %rel_path, chunks = chunks.len(), "chunked");

        // Forget the old checksum first: if anything below fails, the next
        // pass sees a mismatch and redoes the file.
        self.checksums
            .delete(rel_path)
            .await
            .at(IndexStage::Removing)?;
        self.store
            .delete_by_file(rel_path)
            .await
            .at(IndexStage::Removing)?;

        let content_type = content_type(rel_path);
        let mut collection_ready = false;
        let mut written = 0usize;
        for batch in chunks.chunks(self.embedder.batch_size()) {
            let texts: Vec<String> = batch.iter().map(embedding_text).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .at(IndexStage::Embedding)?;

            if !collection_ready && let Some(first) = vectors.first() {
                self.store
                    .ensure_collection(first.len())
                    .await
                    .at(IndexStage::Upserting)?;
                collection_ready = true;
            }

            let indexed_at = unix_now();
            let entries: Vec<IndexEntry> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    chunk,
                    vector,
                    indexed_at,
                    content_type,
                })
                .collect();
            self.store.upsert(entries).await.at(IndexStage::Upserting)?;
            written += batch.len();
        }

        self.checksums
            .put(&FileIndexState {
                file_path: rel_path.to_owned(),
                checksum,
                indexed_at: unix_now(),
                chunk_count: chunks.len(),
            })
            .await
            .at(IndexStage::Committing)?;

        tracing::info!(file = %rel_path, chunks = written, "indexed");
        Ok(FileOutcome::Updated { chunks: written })
    }

    async fn remove_tracked(&self, rel_path: &str) -> std::result::Result<FileOutcome, StageError> {
        let _lease = self.lock_file(rel_path).await;
        self.remove_locked(rel_path).await
    }

    /// Caller holds the file lock.
    async fn remove_locked(&self, rel_path: &str) -> std::result::Result<FileOutcome, StageError> {
        self.store
            .delete_by_file(rel_path)
            .await
            .at(IndexStage::Removing)?;
        let was_tracked = self
            .checksums
            .delete(rel_path)
            .await
            .at(IndexStage::Removing)?;
        if was_tracked {
            tracing::info!(file = %rel_path, "removed from index");
            Ok(FileOutcome::Removed)
        } else {
            Ok(FileOutcome::Untracked)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scribe_llm::mock::MockProvider;
    use scribe_memory::InMemoryVectorStore;
    use scribe_memory::sqlite::SqliteStore;

    use super::*;
    use crate::embedder::EmbeddingConfig;

    struct Fixture {
        dir: tempfile::TempDir,
        mock: MockProvider,
        indexer: Indexer<MockProvider>,
    }

    async fn fixture(mock: MockProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        let embedder = EmbeddingClient::new(
            Arc::new(mock.clone()),
            EmbeddingConfig {
                batch_size: 2,
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
            Corpus::new(dir.path(), &[]),
            ChecksumStore::new(sqlite.pool().clone()),
            embedder,
            store,
            IndexerConfig::default(),
        );
        Fixture { dir, mock, indexer }
    }

    fn write(f: &Fixture, name: &str, body: &str) {
        let path = f.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn index_all_writes_chunks_and_checksums() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "notes.md", "## A\nalpha content here\n\n## B\nbeta content here\n");

        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_updated, 1);
        assert_eq!(report.chunks_written, 2);
        assert!(report.errors.is_empty());

        let state = f.indexer.checksums().get("notes.md").await.unwrap().unwrap();
        assert_eq!(state.chunk_count, 2);
        assert_eq!(f.indexer.store().count(Some("notes.md")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_run_skips_unchanged_files() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha\n");
        f.indexer.index_all(false).await.unwrap();
        let calls = f.mock.embed_calls();

        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_updated, 0);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(f.mock.embed_calls(), calls);
    }

    #[tokio::test]
    async fn force_reindexes_unchanged_files() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha\n");
        f.indexer.index_all(false).await.unwrap();
        let report = f.indexer.index_all(true).await.unwrap();
        assert_eq!(report.files_updated, 1);
    }

    #[tokio::test]
    async fn shrinking_file_leaves_no_stale_chunks() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\none\n# B\ntwo\n# C\nthree\n");
        f.indexer.index_all(false).await.unwrap();
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 3);

        write(&f, "a.md", "# A\none\n");
        f.indexer.index_all(false).await.unwrap();
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_isolated_and_not_committed() {
        let f = fixture(MockProvider::default().fail_embed_on("poison")).await;
        write(&f, "bad.md", "# Bad\npoison pill\n");
        write(&f, "good.md", "# Good\nfine text\n");

        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_updated, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].file_path, "bad.md");
        assert_eq!(report.errors[0].stage, IndexStage::Embedding);
        assert!(f.indexer.checksums().get("bad.md").await.unwrap().is_none());
        assert!(f.indexer.checksums().get("good.md").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn removed_files_are_cleaned_up() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha\n");
        write(&f, "b.md", "# B\nbeta\n");
        f.indexer.index_all(false).await.unwrap();

        std::fs::remove_file(f.dir.path().join("a.md")).unwrap();
        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 0);
        assert!(f.indexer.checksums().get("a.md").await.unwrap().is_none());
        assert_eq!(f.indexer.store().count(Some("b.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_file_on_missing_path_removes_it() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A\nalpha\n");
        let abs = f.indexer.corpus().root().join("a.md");
        let report = f.indexer.index_file(&abs, false).await.unwrap();
        assert_eq!(report.files_updated, 1);

        std::fs::remove_file(&abs).unwrap();
        let report = f.indexer.index_file(&abs, false).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(f.indexer.store().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn index_file_accepts_relative_path_and_ignores_other_types() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "docs/guide.txt", "plain guide text");
        write(&f, "image.png", "binary");

        let report = f
            .indexer
            .index_file(Path::new("docs/guide.txt"), false)
            .await
            .unwrap();
        assert_eq!(report.files_updated, 1);
        assert!(f.indexer.checksums().get("docs/guide.txt").await.unwrap().is_some());

        let report = f.indexer.index_file(Path::new("image.png"), false).await.unwrap();
        assert_eq!(report, IndexReport { duration_ms: report.duration_ms, ..IndexReport::default() });
    }

    #[tokio::test]
    async fn concurrent_index_of_same_file_is_serialized() {
        let f = fixture(MockProvider::default().with_delay(5)).await;
        write(&f, "a.md", "# A\none\n# B\ntwo\n# C\nthree\n");
        let path = f.indexer.corpus().root().join("a.md");

        let (r1, r2) = tokio::join!(
            f.indexer.index_file(&path, true),
            f.indexer.index_file(&path, true)
        );
        assert_eq!(r1.unwrap().files_updated, 1);
        assert_eq!(r2.unwrap().files_updated, 1);
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 3);
        assert!(f.indexer.file_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_forced_reindex_is_redone_by_next_plain_run() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "a.md", "# A
alpha
");
        f.indexer.index_all(false).await.unwrap();

        let _ = f.mock.clone().with_transient_embed_failures(100);
        let report = f.indexer.index_all(true).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 0);
        assert!(f.indexer.checksums().get("a.md").await.unwrap().is_none());

        let _ = f.mock.clone().with_transient_embed_failures(0);
        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_updated, 1);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reverting_a_failed_edit_restores_the_file() {
        let f = fixture(MockProvider::default().fail_embed_on("poison")).await;
        write(&f, "a.md", "# A
alpha
");
        f.indexer.index_all(false).await.unwrap();

        write(&f, "a.md", "# A
poison
");
        assert_eq!(f.indexer.index_all(false).await.unwrap().errors.len(), 1);

        write(&f, "a.md", "# A
alpha
");
        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_updated, 1);
        assert_eq!(f.indexer.store().count(Some("a.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn index_file_outside_corpus_is_ignored() {
        let f = fixture(MockProvider::default()).await;
        let outside = tempfile::tempdir().unwrap();
        let path = outside.path().join("stray.md");
        std::fs::write(&path, "# Stray
text
").unwrap();

        let report = f.indexer.index_file(&path, false).await.unwrap();
        assert_eq!(report.files_scanned, 0);
        let report = f
            .indexer
            .index_file(Path::new("../stray.md"), false)
            .await
            .unwrap();
        assert_eq!(report.files_scanned, 0);
        assert!(f.indexer.checksums().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_file_is_tracked_with_zero_chunks() {
        let f = fixture(MockProvider::default()).await;
        write(&f, "empty.md", "");
        let report = f.indexer.index_all(false).await.unwrap();
        assert_eq!(report.files_updated, 1);
        assert_eq!(report.chunks_written, 0);
        let state = f.indexer.checksums().get("empty.md").await.unwrap().unwrap();
        assert_eq!(state.chunk_count, 0);
    }

    #[test]
    fn stage_display() {
        assert_eq!(IndexStage::Embedding.to_string(), "embedding");
    }
}
