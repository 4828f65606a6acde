//! Process startup: config resolution and construction of the shared engine
//! handle passed to every command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scribe_index::checksum::ChecksumStore;
use scribe_index::{ChunkStore, Corpus, EmbeddingClient, Indexer, IndexerConfig, Retriever};
use scribe_llm::LlmProvider;
use scribe_llm::any::AnyProvider;
use scribe_llm::ollama::OllamaProvider;
use scribe_llm::openai::OpenAiProvider;
use scribe_memory::sqlite::SqliteStore;
use scribe_memory::{InMemoryVectorStore, QdrantOps, VectorStore};

use crate::config::{Config, OpenAiConfig, ProviderKind, VectorBackend};
use crate::query::{QueryEngine, QuerySettings};

/// Priority: CLI `--config` > `SCRIBE_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("SCRIBE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Load, override from the environment, and validate.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or a setting is invalid.
pub fn load_config(cli: Option<&Path>) -> anyhow::Result<Config> {
    let path = resolve_config_path(cli);
    let config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// # Errors
///
/// Returns an error if the selected provider is missing its credentials.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("SCRIBE_OPENAI_API_KEY not set for openai provider")?;
            let openai = config.llm.openai.clone().unwrap_or_default();
            let OpenAiConfig {
                base_url,
                model,
                max_tokens,
                embedding_model,
            } = openai;
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key.expose().to_owned(),
                base_url,
                model,
                max_tokens,
                embedding_model,
            )))
        }
    }
}

pub async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e}"),
        }
    }
}

/// # Errors
///
/// Returns an error if the Qdrant client cannot be constructed.
pub fn create_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vector.backend {
        VectorBackend::Qdrant => {
            let ops = QdrantOps::new(&config.vector.qdrant_url)
                .with_context(|| format!("invalid qdrant url {}", config.vector.qdrant_url))?;
            tracing::info!(url = %config.vector.qdrant_url, "using qdrant vector store");
            Ok(Arc::new(ops))
        }
        VectorBackend::Memory => {
            tracing::warn!("using in-memory vector store, the index is lost on exit");
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
    }
}

/// Process-wide handle: one SQLite pool, one vector store, one provider.
pub struct Engine<P> {
    pub sqlite: SqliteStore,
    pub indexer: Arc<Indexer<P>>,
    pub retriever: Arc<Retriever<P>>,
    pub query: QueryEngine<P>,
}

impl<P: LlmProvider> Engine<P> {
    /// Wire every component from `config` around the given provider and
    /// vector store.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` database cannot be opened.
    pub async fn build(
        config: &Config,
        provider: P,
        vectors: Arc<dyn VectorStore>,
    ) -> anyhow::Result<Self> {
        let sqlite_path = &config.storage.sqlite_path;
        if sqlite_path != ":memory:"
            && let Some(parent) = Path::new(sqlite_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let sqlite = SqliteStore::new(sqlite_path)
            .await
            .with_context(|| format!("failed to open sqlite database {sqlite_path}"))?;

        if !config.corpus.root.is_dir() {
            tracing::warn!(root = %config.corpus.root.display(), "corpus root is not a directory");
        }
        let corpus = Corpus::new(&config.corpus.root, &config.corpus.extensions);

        let provider = Arc::new(provider);
        let embedder = EmbeddingClient::new(
            Arc::clone(&provider),
            config.index.embedding(&config.timeouts),
        );
        let store = ChunkStore::new(
            vectors,
            config.vector.collection.clone(),
            Duration::from_secs(config.timeouts.vector_seconds),
        );
        let chunker = config.index.chunker();

        let indexer = Arc::new(Indexer::new(
            corpus.clone(),
            ChecksumStore::new(sqlite.pool().clone()),
            embedder.clone(),
            store.clone(),
            IndexerConfig {
                chunker: chunker.clone(),
                concurrency: config.index.concurrency,
            },
        ));
        let retriever = Arc::new(Retriever::new(
            corpus,
            chunker,
            embedder,
            store,
            config.retrieval.ranking.clone(),
        ));
        let query = QueryEngine::new(
            Arc::clone(&retriever),
            provider,
            sqlite.clone(),
            QuerySettings {
                max_turns: config.query.max_turns,
                min_similarity: config.retrieval.min_similarity,
                confidence: config.query.confidence.clone(),
                generation_timeout: Duration::from_secs(config.timeouts.llm_seconds),
            },
        );

        Ok(Self {
            sqlite,
            indexer,
            retriever,
            query,
        })
    }
}

/// Build the engine for the configured provider and vector backend.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub async fn build_engine(config: &Config) -> anyhow::Result<Engine<AnyProvider>> {
    let provider = create_provider(config)?;
    health_check(&provider).await;
    let vectors = create_vector_store(config)?;
    Engine::build(config, provider, vectors).await
}
