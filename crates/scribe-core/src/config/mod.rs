mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let index = &self.index;
        if index.batch_size == 0 {
            bail!("index.batch_size must be at least 1");
        }
        if index.concurrency == 0 {
            bail!("index.concurrency must be at least 1");
        }
        if index.max_attempts == 0 {
            bail!("index.max_attempts must be at least 1");
        }
        if index.min_chunk_chars > index.target_chunk_chars
            || index.target_chunk_chars > index.max_chunk_chars
        {
            bail!(
                "chunk sizes must satisfy min <= target <= max, got {} / {} / {}",
                index.min_chunk_chars,
                index.target_chunk_chars,
                index.max_chunk_chars
            );
        }
        let timeouts = &self.timeouts;
        if timeouts.llm_seconds == 0 || timeouts.embedding_seconds == 0 || timeouts.vector_seconds == 0
        {
            bail!("timeouts must be at least 1 second");
        }
        if !(1..=6).contains(&index.max_heading_level) {
            bail!("index.max_heading_level must be between 1 and 6");
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            bail!("retrieval.min_similarity must be within [0, 1]");
        }
        let ranking = &self.retrieval.ranking;
        if ranking.length_bonus_max < 0.0
            || ranking.section_bonus < 0.0
            || ranking.term_overlap_max < 0.0
        {
            bail!("retrieval.ranking bonuses must not be negative");
        }
        let confidence = &self.query.confidence;
        if confidence.similarity < 0.0
            || confidence.coverage < 0.0
            || confidence.context_length < 0.0
        {
            bail!("query.confidence weights must not be negative");
        }
        if self.llm.provider == ProviderKind::OpenAi && self.secrets.openai_api_key.is_none() {
            bail!("SCRIBE_OPENAI_API_KEY is required for the openai provider");
        }
        Ok(())
    }
}
