use std::path::PathBuf;
use std::str::FromStr;

use super::{Config, Secret};

/// Parse `SCRIBE_*` variable `key`, warning and returning `None` on bad input.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.trim().parse::<T>() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

/// Parse a lowercase serde enum value such as a provider or backend name.
fn parsed_enum<T: serde::de::DeserializeOwned>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.trim().to_lowercase())) {
        Some(kind)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_storage();
        self.apply_env_overrides_tuning();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Some(kind) = parsed_enum("SCRIBE_LLM_PROVIDER") {
            self.llm.provider = kind;
        }
        if let Ok(v) = std::env::var("SCRIBE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("SCRIBE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("SCRIBE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("SCRIBE_OPENAI_API_KEY")
            && !v.is_empty()
        {
            self.secrets.openai_api_key = Some(Secret::new(v));
        }
    }

    fn apply_env_overrides_storage(&mut self) {
        if let Ok(v) = std::env::var("SCRIBE_CORPUS_ROOT") {
            self.corpus.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SCRIBE_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("SCRIBE_QDRANT_URL") {
            self.vector.qdrant_url = v;
        }
        if let Some(backend) = parsed_enum("SCRIBE_VECTOR_BACKEND") {
            self.vector.backend = backend;
        }
    }

    fn apply_env_overrides_tuning(&mut self) {
        if let Some(n) = parsed("SCRIBE_INDEX_BATCH_SIZE") {
            self.index.batch_size = n;
        }
        if let Some(n) = parsed("SCRIBE_INDEX_CONCURRENCY") {
            self.index.concurrency = n;
        }
        if let Some(n) = parsed("SCRIBE_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = n;
        }
        if let Some(v) = parsed("SCRIBE_RETRIEVAL_MIN_SIMILARITY") {
            self.retrieval.min_similarity = v;
        }
        if let Some(secs) = parsed("SCRIBE_TIMEOUT_EMBEDDING") {
            self.timeouts.embedding_seconds = secs;
        }
        if let Some(secs) = parsed("SCRIBE_TIMEOUT_VECTOR") {
            self.timeouts.vector_seconds = secs;
        }
        if let Some(secs) = parsed("SCRIBE_TIMEOUT_LLM") {
            self.timeouts.llm_seconds = secs;
        }
    }
}
