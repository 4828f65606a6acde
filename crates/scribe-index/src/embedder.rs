//! Batched text-to-vector calls with bounded timeout and retry.

use std::sync::Arc;
use std::time::Duration;

use scribe_llm::{LlmError, LlmProvider};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Texts per provider request (default: 100).
    pub batch_size: usize,
    /// Attempts per batch before giving up (default: 3).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
    /// Upper bound for a single provider call.
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct EmbeddingClient<P> {
    provider: Arc<P>,
    config: EmbeddingConfig,
}

impl<P> Clone for EmbeddingClient<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
        }
    }
}

impl<P: LlmProvider> EmbeddingClient<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Embed one batch in a single provider request, one vector per input in
    /// input order. Transient failures are retried with exponential backoff.
    ///
    /// # Errors
    ///
    /// [`IndexError::EmbeddingUnavailable`] once attempts are exhausted or on a
    /// permanent provider error; [`IndexError::DimensionMismatch`] if the
    /// returned vectors disagree on length.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.call_with_retry(texts).await?;
        check_dimensions(&vectors)?;
        Ok(vectors)
    }

    /// # Errors
    ///
    /// Same as [`Self::embed_batch`].
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors.pop().ok_or(IndexError::EmbeddingUnavailable {
            attempts: 1,
            source: LlmError::EmptyResponse {
                provider: self.provider.name(),
            },
        })
    }

    async fn call_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(
                self.config.timeout,
                self.provider.embed_batch(texts),
            )
            .await
            {
                Ok(Ok(vectors)) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(Ok(vectors)) => LlmError::BatchMismatch {
                    provider: self.provider.name(),
                    expected: texts.len(),
                    got: vectors.len(),
                },
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout {
                    operation: "embedding",
                    seconds: self.config.timeout.as_secs(),
                },
            };

            if attempt >= max_attempts || !err.is_transient() {
                return Err(IndexError::EmbeddingUnavailable {
                    attempts: attempt,
                    source: err,
                });
            }

            tracing::warn!(
                provider = self.provider.name(),
                attempt,
                max_attempts,
                batch = texts.len(),
                "embedding failed, retrying in {}ms: {err}",
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}

fn check_dimensions(vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let expected = first.len();
    if expected == 0 {
        return Err(IndexError::DimensionMismatch { expected: 1, got: 0 });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(IndexError::DimensionMismatch {
            expected,
            got: bad.len(),
        });
    }
    Ok(())
}
