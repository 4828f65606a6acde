//! Chunk-level adapter over a [`VectorStore`] collection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use scribe_memory::{ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore, VectorStoreError};

use crate::chunker::Chunk;
use crate::error::Result;

pub const DEFAULT_COLLECTION: &str = "scribe_chunks";

/// A chunk plus its embedding, as stored in the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Unix seconds.
    pub indexed_at: i64,
    pub content_type: &'static str,
}

/// Stored chunk metadata returned by [`ChunkStore::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub id: String,
    pub file_path: String,
    pub section_path: Vec<String>,
    pub position_index: usize,
    pub content_hash: String,
    /// Text as of indexing time; may be stale.
    pub stored_text: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub similarity: f32,
}

/// Exact-match metadata filters for search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub file_path: Option<String>,
    pub content_type: Option<String>,
}

impl SearchFilters {
    fn to_vector_filter(&self) -> Option<VectorFilter> {
        let mut filter = VectorFilter::default();
        if let Some(path) = &self.file_path {
            filter = filter.must("file_path", path.as_str());
        }
        if let Some(ct) = &self.content_type {
            filter = filter.must("content_type", ct.as_str());
        }
        (!filter.is_empty()).then_some(filter)
    }
}

#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn VectorStore>,
    collection: String,
    timeout: Duration,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("collection", &self.collection)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChunkStore {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            collection: collection.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = std::result::Result<T, VectorStoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(VectorStoreError::Timeout {
                operation,
                seconds: self.timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn exists(&self) -> Result<bool> {
        self.bounded("collection_exists", self.store.collection_exists(&self.collection))
            .await
    }

    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let size = u64::try_from(dimension)?;
        self.bounded(
            "ensure_collection",
            self.store.ensure_collection(&self.collection, size),
        )
        .await
    }

    /// Insert or replace entries by chunk id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let points = entries.into_iter().map(entry_to_point).collect();
        self.bounded("upsert", self.store.upsert(&self.collection, points))
            .await
    }

    /// Remove every entry of `file_path`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        if !self.exists().await? {
            return Ok(());
        }
        let filter = VectorFilter::default().must("file_path", file_path);
        self.bounded(
            "delete_by_file",
            self.store.delete_by_filter(&self.collection, filter),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        if !self.exists().await? {
            return Ok(());
        }
        self.bounded(
            "delete_by_id",
            self.store.delete_by_ids(&self.collection, vec![id.to_owned()]),
        )
        .await
    }

    /// Nearest chunks to `vector`, at most `top_k`, each with similarity at
    /// least `min_similarity`. Sorted by similarity descending, then
    /// `position_index` ascending. An index with no collection yet is empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filters: &SearchFilters,
        min_similarity: f32,
    ) -> Result<Vec<ChunkHit>> {
        if top_k == 0 || !self.exists().await? {
            return Ok(Vec::new());
        }
        let limit = u64::try_from(top_k)?;
        let points = self
            .bounded(
                "search",
                self.store
                    .search(&self.collection, vector, limit, filters.to_vector_filter()),
            )
            .await?;

        let mut hits: Vec<ChunkHit> = points
            .into_iter()
            .filter_map(|p| {
                let hit = point_to_hit(p);
                if hit.is_none() {
                    tracing::warn!(collection = %self.collection, "skipping point with malformed payload");
                }
                hit
            })
            .filter(|h| h.similarity >= min_similarity)
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.position_index.cmp(&b.position_index))
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Number of stored entries, optionally restricted to one file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::VectorIndexUnavailable`] on engine failure.
    pub async fn count(&self, file_path: Option<&str>) -> Result<u64> {
        if !self.exists().await? {
            return Ok(0);
        }
        let filter = file_path.map(|p| VectorFilter::default().must("file_path", p));
        self.bounded("count", self.store.count(&self.collection, filter))
            .await
    }
}

fn entry_to_point(entry: IndexEntry) -> VectorPoint {
    let IndexEntry {
        chunk,
        vector,
        indexed_at,
        content_type,
    } = entry;
    let mut payload = HashMap::new();
    payload.insert("file_path".into(), serde_json::json!(chunk.file_path));
    payload.insert("section_path".into(), serde_json::json!(chunk.section_path));
    payload.insert(
        "position_index".into(),
        serde_json::json!(chunk.position_index),
    );
    payload.insert("content_hash".into(), serde_json::json!(chunk.content_hash));
    payload.insert("text".into(), serde_json::json!(chunk.text));
    payload.insert("char_length".into(), serde_json::json!(chunk.char_length));
    payload.insert("content_type".into(), serde_json::json!(content_type));
    payload.insert("indexed_at".into(), serde_json::json!(indexed_at));
    VectorPoint {
        id: chunk.id,
        vector,
        payload,
    }
}

fn point_to_hit(point: ScoredVectorPoint) -> Option<ChunkHit> {
    let p = &point.payload;
    let file_path = p.get("file_path")?.as_str()?.to_owned();
    let position_index = usize::try_from(p.get("position_index")?.as_u64()?).ok()?;
    let section_path = p
        .get("section_path")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|s| s.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();
    let content_hash = p
        .get("content_hash")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    let stored_text = p
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    Some(ChunkHit {
        id: point.id,
        file_path,
        section_path,
        position_index,
        content_hash,
        stored_text,
        similarity: point.score.clamp(0.0, 1.0),
    })
}
