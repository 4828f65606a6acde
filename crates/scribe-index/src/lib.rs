//! Incremental document indexing and semantic retrieval.
//!
//! Source files are split into heading-aware chunks, embedded in batches and
//! stored in a vector collection. A per-file checksum makes reindexing
//! incremental. Retrieval re-reads live source text, drops duplicates and
//! re-ranks candidates with length, heading and term-overlap bonuses.

pub mod checksum;
pub mod chunker;
pub mod corpus;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod retriever;
pub mod store;
pub mod watcher;

pub use checksum::{ChecksumStore, FileIndexState};
pub use chunker::{Chunk, ChunkerConfig, HeadingRules};
pub use corpus::Corpus;
pub use embedder::{EmbeddingClient, EmbeddingConfig};
pub use error::{IndexError, Result};
pub use indexer::{FileError, IndexReport, IndexStage, Indexer, IndexerConfig};
pub use retriever::{RankingWeights, RetrievedChunk, Retriever};
pub use store::{ChunkHit, ChunkStore, SearchFilters};
pub use watcher::IndexWatcher;
