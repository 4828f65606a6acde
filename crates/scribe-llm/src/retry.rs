use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::LlmError;

/// How a provider reacts to `429 Too Many Requests`.
///
/// Other statuses pass straight through to the caller. Transport errors are
/// returned on the first failure.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimitPolicy {
    /// Requests sent in total, the first one included.
    pub attempts: u32,
    /// Wait after the first 429 when the server gives no `Retry-After`.
    pub first_wait: Duration,
    /// Upper bound for the computed wait.
    pub max_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            first_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(64),
        }
    }
}

impl RateLimitPolicy {
    /// Wait before request number `sent + 1`, doubling per 429 seen.
    fn wait_after(&self, sent: u32) -> Duration {
        let factor = 1u32 << sent.saturating_sub(1).min(16);
        self.first_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Run `send` until the response is not a 429 or attempts run out.
    ///
    /// # Errors
    ///
    /// [`LlmError::RateLimited`] once every attempt was rate limited, and
    /// [`LlmError::Http`] when the request itself fails.
    pub(crate) async fn send<F, Fut>(
        &self,
        provider: &str,
        mut send: F,
    ) -> Result<reqwest::Response, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut sent = 0;
        loop {
            let response = send().await.map_err(LlmError::Http)?;
            sent += 1;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if sent >= self.attempts {
                return Err(LlmError::RateLimited);
            }
            let wait = retry_after(response.headers()).unwrap_or_else(|| self.wait_after(sent));
            tracing::warn!(provider, sent, attempts = self.attempts, ?wait, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

/// `Retry-After` in delta-seconds form; the HTTP-date form is ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick(attempts: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            attempts,
            first_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    #[test]
    fn wait_doubles_up_to_the_cap() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.wait_after(1), Duration::from_secs(1));
        assert_eq!(policy.wait_after(2), Duration::from_secs(2));
        assert_eq!(policy.wait_after(3), Duration::from_secs(4));
        assert_eq!(policy.wait_after(40), Duration::from_secs(64));
    }

    #[test]
    fn retry_after_reads_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn non_429_status_is_returned_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = quick(3)
            .send("test", || client.get(server.uri()).send())
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = quick(2)
            .send("test", || client.get(server.uri()).send())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited), "got {err:?}");
    }

    #[tokio::test]
    async fn recovers_once_the_limit_lifts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = quick(3)
            .send("test", || client.get(server.uri()).send())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn wait_stays_within_bounds(sent in 1u32..1000) {
            let policy = RateLimitPolicy::default();
            let wait = policy.wait_after(sent);
            prop_assert!(wait >= policy.first_wait);
            prop_assert!(wait <= policy.max_wait);
        }
    }
}
