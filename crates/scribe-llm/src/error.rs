#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable")]
    Unavailable,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("{provider} returned {got} embeddings for {expected} inputs")]
    BatchMismatch {
        provider: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same request later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited | Self::Unavailable | Self::Timeout { .. } | Self::Other(_) => true,
            Self::Json(_)
            | Self::EmptyResponse { .. }
            | Self::EmbedUnsupported { .. }
            | Self::BatchMismatch { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_transient() {
        assert!(LlmError::RateLimited.is_transient());
        assert!(
            LlmError::Timeout {
                operation: "embed",
                seconds: 5
            }
            .is_transient()
        );
    }

    #[test]
    fn unsupported_is_permanent() {
        assert!(!LlmError::EmbedUnsupported { provider: "x" }.is_transient());
        assert!(
            !LlmError::BatchMismatch {
                provider: "x",
                expected: 2,
                got: 1
            }
            .is_transient()
        );
    }

    #[test]
    fn display_batch_mismatch() {
        let err = LlmError::BatchMismatch {
            provider: "openai",
            expected: 3,
            got: 2,
        };
        assert_eq!(err.to_string(), "openai returned 2 embeddings for 3 inputs");
    }
}
