//! HTTP transport seam
//!
//! The REST clients build [`HttpRequest`] values and hand them to an
//! [`HttpTransport`]. Production code uses the reqwest-backed transport from
//! `kbseed-vector`; tests plug in in-memory fakes.

use crate::{BackoffPolicy, TransportError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A JSON request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a completed request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Rate limited or server-side failure
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Body shortened for error messages
    pub fn body_excerpt(&self) -> String {
        const LIMIT: usize = 500;
        if self.body.chars().count() <= LIMIT {
            self.body.clone()
        } else {
            let mut excerpt: String = self.body.chars().take(LIMIT).collect();
            excerpt.push_str("...");
            excerpt
        }
    }
}

/// Executes HTTP requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Execute `request`, retrying while `should_retry` holds and `policy` allows
///
/// Returns the last outcome once it is not retryable or the policy gives up.
pub async fn execute_with_backoff<F>(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    policy: &dyn BackoffPolicy,
    should_retry: F,
) -> Result<HttpResponse, TransportError>
where
    F: Fn(&Result<HttpResponse, TransportError>) -> bool + Send,
{
    let mut attempt = 0u32;
    loop {
        let outcome = transport.execute(request.clone()).await;
        if !should_retry(&outcome) {
            return outcome;
        }
        let Some(delay) = policy.next_delay(attempt) else {
            return outcome;
        };

        match &outcome {
            Ok(response) => tracing::warn!(
                url = %request.url,
                status = response.status,
                retry_in_ms = delay.as_millis() as u64,
                "Retryable response"
            ),
            Err(e) => tracing::warn!(
                url = %request.url,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Transport error, retrying"
            ),
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixedDelay, NoRetry};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Queue(Mutex<VecDeque<Result<HttpResponse, TransportError>>>);

    #[async_trait]
    impl HttpTransport for Queue {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("exhausted".to_string())))
        }
    }

    fn queue(items: Vec<Result<HttpResponse, TransportError>>) -> Queue {
        Queue(Mutex::new(items.into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let transport = queue(vec![
            Ok(HttpResponse::new(503, "loading")),
            Ok(HttpResponse::new(200, "[1.0]")),
        ]);
        let policy = FixedDelay::new(Duration::from_secs(20), 3);
        let started = tokio::time::Instant::now();

        let response = execute_with_backoff(
            &transport,
            &HttpRequest::get("http://x"),
            &policy,
            |o| matches!(o, Ok(r) if r.status == 503),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 200);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_gives_up_when_policy_exhausted() {
        let transport = queue(vec![
            Ok(HttpResponse::new(500, "boom")),
            Ok(HttpResponse::new(200, "ok")),
        ]);

        let response = execute_with_backoff(
            &transport,
            &HttpRequest::get("http://x"),
            &NoRetry,
            |o| matches!(o, Ok(r) if r.is_transient()),
        )
        .await
        .unwrap();

        assert_eq!(response.status, 500);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = HttpRequest::get("http://x").with_header("X-Chroma-Token", "secret");
        assert_eq!(request.header("x-chroma-token"), Some("secret"));
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let response = HttpResponse::new(500, "e".repeat(600));
        assert_eq!(response.body_excerpt().chars().count(), 503);
    }
}
