//! Test-only mock provider.
//!
//! Embeddings are a normalized bag of hashed lowercase tokens, so texts that
//! share words land close together and identical texts embed identically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

pub const MOCK_EMBEDDING_DIM: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    captured: Arc<Mutex<Vec<Vec<Message>>>>,
    embed_calls: Arc<AtomicUsize>,
    transient_embed_failures: Arc<AtomicUsize>,
    pub default_response: String,
    pub dimension: usize,
    pub supports_embeddings: bool,
    pub fail_chat: bool,
    /// Any embedding input containing this substring always fails.
    pub fail_embed_on: Option<String>,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            transient_embed_failures: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            dimension: MOCK_EMBEDDING_DIM,
            supports_embeddings: true,
            fail_chat: false,
            fail_embed_on: None,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn without_embeddings() -> Self {
        Self {
            supports_embeddings: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn fail_embed_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_embed_on = Some(needle.into());
        self
    }

    /// Make the next `n` embedding calls fail with [`LlmError::Unavailable`].
    #[must_use]
    pub fn with_transient_embed_failures(self, n: usize) -> Self {
        self.transient_embed_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `embed`/`embed_batch` calls that reached the provider.
    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Every message list passed to `chat`, oldest first.
    #[must_use]
    pub fn captured(&self) -> Vec<Vec<Message>> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_embed(&self, texts: &[&str]) -> Result<(), LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported { provider: "mock" });
        }
        let pending = self.transient_embed_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_embed_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(LlmError::Unavailable);
        }
        if let Some(needle) = &self.fail_embed_on
            && texts.iter().any(|t| t.contains(needle.as_str()))
        {
            return Err(LlmError::Other(format!(
                "mock embedding rejected input containing {needle:?}"
            )));
        }
        Ok(())
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

/// Hash every lowercase alphanumeric token into a fixed bucket and L2-normalize.
#[must_use]
pub fn bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension.max(1)];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash = FNV_OFFSET;
        for byte in token.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (hash % vector.len() as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.pause().await;
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.pause().await;
        self.check_embed(&[text])?;
        Ok(bag_of_words(text, self.dimension))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.pause().await;
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.check_embed(&refs)?;
        Ok(texts
            .iter()
            .map(|t| bag_of_words(t, self.dimension))
            .collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn bag_of_words_is_normalized() {
        let v = bag_of_words("alpha beta gamma", MOCK_EMBEDDING_DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn bag_of_words_empty_text_is_zero() {
        let v = bag_of_words("  \n ", 8);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn shared_tokens_score_higher() {
        let query = bag_of_words("alpha", MOCK_EMBEDDING_DIM);
        let hit = bag_of_words("alpha content here", MOCK_EMBEDDING_DIM);
        let miss = bag_of_words("beta content here", MOCK_EMBEDDING_DIM);
        assert!(cosine(&query, &hit) > cosine(&query, &miss));
    }

    #[test]
    fn case_insensitive_tokens() {
        assert_eq!(
            bag_of_words("Rust Notes", 64),
            bag_of_words("rust notes", 64)
        );
    }

    #[tokio::test]
    async fn responses_are_consumed_in_order() {
        let mock = MockProvider::with_responses(vec!["one".into(), "two".into()]);
        let msgs = [Message::user("q")];
        assert_eq!(mock.chat(&msgs).await.unwrap(), "one");
        assert_eq!(mock.chat(&msgs).await.unwrap(), "two");
        assert_eq!(mock.chat(&msgs).await.unwrap(), "mock response");
        assert_eq!(mock.captured().len(), 3);
    }

    #[tokio::test]
    async fn failing_chat_still_captures_prompt() {
        let mock = MockProvider::failing();
        assert!(mock.chat(&[Message::user("q")]).await.is_err());
        assert_eq!(mock.captured()[0][0].content, "q");
    }

    #[tokio::test]
    async fn fail_embed_on_rejects_whole_batch() {
        let mock = MockProvider::default().fail_embed_on("poison");
        let err = mock
            .embed_batch(&["fine".into(), "poison pill".into()])
            .await
            .unwrap_err();
        assert!(!matches!(err, LlmError::Unavailable));
        assert!(mock.embed("fine").await.is_ok());
        assert_eq!(mock.embed_calls(), 2);
    }

    #[tokio::test]
    async fn transient_failures_clear_after_count() {
        let mock = MockProvider::default().with_transient_embed_failures(2);
        assert!(matches!(mock.embed("x").await, Err(LlmError::Unavailable)));
        assert!(matches!(mock.embed("x").await, Err(LlmError::Unavailable)));
        assert_eq!(mock.embed("x").await.unwrap().len(), MOCK_EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let mock = MockProvider::default();
        let clone = mock.clone();
        clone.embed("x").await.unwrap();
        assert_eq!(mock.embed_calls(), 1);
    }
}
