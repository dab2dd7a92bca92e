use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Identifies the crawler to the documentation site.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; relfeed/0.1; +https://github.com/relfeed/relfeed)";

const CONTENT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a single URL.
///
/// Every variant is scoped to one request; callers treat any of them as
/// "no result" for that URL and carry on with its siblings.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The request pool was shut down while waiting for a slot
    #[error("Request pool closed")]
    PoolClosed,
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Final URL after redirects
    pub url: String,
    /// Lowercased `Content-Type` header, empty if absent
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Fetched {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// True when the server declared an RSS/Atom/XML media type.
    pub fn is_xml(&self) -> bool {
        let ct = &self.content_type;
        ct.contains("application/rss+xml")
            || ct.contains("application/atom+xml")
            || ct.contains("application/xml")
            || ct.contains("text/xml")
    }

    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html") || self.content_type.contains("application/xhtml")
    }
}

/// Shared HTTP access for every component of a run.
///
/// Wraps one pooled [`reqwest::Client`] plus a semaphore sized to the worker
/// count, so the number of in-flight requests never exceeds the pool width no
/// matter how tasks fan out. Cloning is cheap and shares both.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    workers: usize,
    content_timeout: Duration,
    probe_timeout: Duration,
}

impl Fetcher {
    /// Builds a fetcher allowing `workers` concurrent requests.
    pub fn new(workers: usize) -> Result<Self, FetchError> {
        Self::with_timeouts(workers, CONTENT_TIMEOUT, PROBE_TIMEOUT)
    }

    /// Like [`Fetcher::new`] with explicit deadlines for GET and HEAD requests.
    pub fn with_timeouts(
        workers: usize,
        content_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let workers = workers.max(1);

        // PERF-019: Pool sized to the worker count so tasks never queue on connections
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(workers)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(content_timeout)
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            content_timeout,
            probe_timeout,
        })
    }

    /// Maximum number of concurrent requests.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// GETs `url` and reads the whole body (size-limited).
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] if the request and body read exceed the content deadline
    /// - [`FetchError::HttpStatus`] for any non-2xx response
    /// - [`FetchError::ResponseTooLarge`] if the body exceeds 10MB
    /// - [`FetchError::Network`] for connection-level failures
    pub async fn get(&self, url: &str) -> Result<Fetched, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::PoolClosed)?;

        tokio::time::timeout(self.content_timeout, self.get_inner(url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn get_inner(&self, url: &str) -> Result<Fetched, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let body = read_limited_bytes(response, MAX_BODY_SIZE).await?;

        Ok(Fetched {
            url: final_url,
            content_type,
            body,
        })
    }

    /// Issues a HEAD request and returns the status code.
    ///
    /// Non-2xx statuses are *not* errors here: existence checks need to tell
    /// "definitely missing" (404) apart from "could not tell" (errors, 405).
    pub async fn head(&self, url: &str) -> Result<u16, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::PoolClosed)?;

        let response = tokio::time::timeout(
            self.probe_timeout,
            self.client.head(url).timeout(self.probe_timeout).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        Ok(response.status().as_u16())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_success_reads_body_and_content_type() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<rss/>", "Application/RSS+XML; charset=utf-8"),
            )
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new(2).unwrap();
        let fetched = fetcher
            .get(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(fetched.text(), "<rss/>");
        assert!(fetched.is_xml());
        assert!(!fetched.is_html());
        assert!(fetched.url.ends_with("/feed"));
    }

    #[tokio::test]
    async fn test_get_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new(1).unwrap();
        assert!(fetcher.get(&mock_server.uri()).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new(1).unwrap();
        match fetcher.get(&format!("{}/missing", mock_server.uri())).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other.map(|f| f.url)),
        }
    }

    #[tokio::test]
    async fn test_get_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new(1).unwrap();
        let result = fetcher.get(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_get_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let fetcher =
            Fetcher::with_timeouts(1, Duration::from_millis(50), Duration::from_millis(50))
                .unwrap();
        let result = fetcher.get(&mock_server.uri()).await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_head_returns_status_without_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = Fetcher::new(2).unwrap();
        let present = fetcher
            .head(&format!("{}/present", mock_server.uri()))
            .await
            .unwrap();
        let absent = fetcher
            .head(&format!("{}/absent", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(present, 200);
        assert_eq!(absent, 404);
    }

    #[tokio::test]
    async fn test_read_limited_bytes_rejects_oversized_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let response = client.get(mock_server.uri()).send().await.unwrap();
        let result = read_limited_bytes(response, 16).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_workers_at_least_one() {
        let fetcher = Fetcher::new(0).unwrap();
        assert_eq!(fetcher.workers(), 1);
    }
}
