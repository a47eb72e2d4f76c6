//! HTTP fetching
//!
//! [`Fetcher`] is the seam the worker pool depends on; [`HttpFetcher`] is the
//! reqwest implementation used by the binary.

use async_trait::async_trait;
use bytes::Bytes;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT},
    Client,
};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::CrawlerConfig;
use crate::parser::sanitize::decode_body;
use crate::utils::error::FetchError;

/// A completed HTTP exchange
///
/// Non-2xx statuses are responses, not errors: the caller decides what a
/// 404 means. Transport failures surface as [`FetchError`] instead.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,

    /// URL after redirects
    pub final_url: String,

    /// Response body; `None` when the body was empty
    pub content: Option<Bytes>,

    /// `Content-Type` header, if present
    pub content_type: Option<String>,
}

impl FetchResponse {
    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded to text using the declared or sniffed charset
    pub fn text(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(|bytes| decode_body(bytes, self.content_type.as_deref()))
    }
}

/// Fetches a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed fetcher with an optional global rate limit
pub struct HttpFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Global limiter shared by every worker (absent = unlimited)
    rate_limiter: Option<DefaultDirectRateLimiter>,

    /// Retries for 429/5xx responses and transient transport failures
    max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    base_delay_ms: u64,
}

impl HttpFetcher {
    /// Create a fetcher from crawler configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        Self::with_options(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
            config.requests_per_second,
            config.max_fetch_retries,
        )
    }

    /// Create a fetcher with explicit settings
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Value of the `User-Agent` header
    /// * `timeout` - Request timeout duration
    /// * `requests_per_second` - Global request cap (0 = unlimited)
    /// * `max_retries` - Retry attempts for retryable failures (0 = none)
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_options(
        user_agent: &str,
        timeout: Duration,
        requests_per_second: u32,
        max_retries: u32,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .default_headers(Self::build_headers(user_agent))
            .build()?;

        let rate_limiter =
            NonZeroU32::new(requests_per_second).map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            client,
            rate_limiter,
            max_retries,
            base_delay_ms: 1000,
        })
    }

    /// Override the backoff base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    /// Determine if a status code should trigger a retry
    ///
    /// Retry on:
    /// - 429 (Too Many Requests)
    /// - 500 (Internal Server Error)
    /// - 502 (Bad Gateway)
    /// - 503 (Service Unavailable)
    /// - 504 (Gateway Timeout)
    pub fn should_retry(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }

    fn build_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        headers
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt - 1));
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    async fn read_response(response: reqwest::Response) -> Result<FetchResponse, FetchError> {
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchResponse {
            status,
            final_url,
            content: (!body.is_empty()).then_some(body),
            content_type,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.backoff(attempt).await;
            }
            // Every attempt, retries included, counts against the global cap
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }
            let last_attempt = attempt >= self.max_retries;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if Self::should_retry(status) && !last_attempt {
                        tracing::debug!(url, status, attempt, "Retryable status, backing off");
                        attempt += 1;
                        continue;
                    }
                    return Self::read_response(response).await;
                }
                Err(e) => {
                    let error = if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Http(e)
                    };

                    if !error.is_recoverable() || self.max_retries == 0 {
                        return Err(error);
                    }
                    if last_attempt {
                        tracing::warn!(url, attempts = attempt + 1, error = %error, "Giving up after retries");
                        return Err(FetchError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                        });
                    }

                    tracing::debug!(url, attempt, error = %error, "Transient fetch failure, backing off");
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static [u8], content_type: Option<&str>) -> FetchResponse {
        FetchResponse {
            status,
            final_url: "http://a.example/x".to_string(),
            content: (!body.is_empty()).then(|| Bytes::from_static(body)),
            content_type: content_type.map(str::to_string),
        }
    }

    #[test]
    fn test_should_retry() {
        // Retryable errors
        assert!(HttpFetcher::should_retry(429));
        assert!(HttpFetcher::should_retry(500));
        assert!(HttpFetcher::should_retry(502));
        assert!(HttpFetcher::should_retry(503));
        assert!(HttpFetcher::should_retry(504));

        // Non-retryable errors
        assert!(!HttpFetcher::should_retry(400));
        assert!(!HttpFetcher::should_retry(403));
        assert!(!HttpFetcher::should_retry(404));
        assert!(!HttpFetcher::should_retry(200));
    }

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new(&CrawlerConfig::default());
        assert!(fetcher.is_ok());
        assert!(fetcher.unwrap().rate_limiter.is_none());

        let limited = HttpFetcher::with_options("test-agent", Duration::from_secs(5), 10, 2).unwrap();
        assert!(limited.rate_limiter.is_some());
        assert_eq!(limited.max_retries, 2);
    }

    #[test]
    fn test_build_headers() {
        let headers = HttpFetcher::build_headers("wayfarer-test/1.0");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "wayfarer-test/1.0");
        assert!(headers.contains_key(ACCEPT));
    }

    #[test]
    fn test_response_success_range() {
        assert!(response(200, b"x", None).is_success());
        assert!(response(204, b"", None).is_success());
        assert!(!response(301, b"", None).is_success());
        assert!(!response(404, b"x", None).is_success());
    }

    #[test]
    fn test_response_text_uses_charset() {
        // "café" in ISO-8859-1
        let latin1 = response(200, &[0x63, 0x61, 0x66, 0xe9], Some("text/html; charset=iso-8859-1"));
        assert_eq!(latin1.text().as_deref(), Some("café"));
        assert_eq!(response(200, b"", None).text(), None);
    }
}
