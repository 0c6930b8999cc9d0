//! Bounded-concurrency HTTP fetch client with conditional-request support.
//!
//! The client performs network I/O only; it never touches storage. Cache
//! validators flow in from the feed's stored state and back out of a
//! successful response for the orchestrator to persist.

use futures::StreamExt;
use reqwest::header::{
    HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::Config;

/// Errors surfaced by a single fetch attempt.
///
/// All of these are retryable by the scheduler's natural next cycle; none is
/// retried within the same run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx/304 status code
    #[error("HTTP error: status {status}")]
    HttpStatus {
        status: u16,
        /// Redacted header snapshot for diagnostics
        detail: serde_json::Value,
    },
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Transfer failed while streaming the body
    #[error("Failed to read response body: {0}")]
    BodyRead(#[source] reqwest::Error),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured debug payload for the fetch-error log. Carries the URL,
    /// status, and selected response headers, never credentials or bodies.
    pub fn detail(&self, url: &str) -> serde_json::Value {
        match self {
            FetchError::HttpStatus { detail, .. } => detail.clone(),
            FetchError::Network(e) => serde_json::json!({
                "url": url,
                "kind": "network",
                "error": e.to_string(),
            }),
            FetchError::Timeout => serde_json::json!({ "url": url, "kind": "timeout" }),
            FetchError::ResponseTooLarge => {
                serde_json::json!({ "url": url, "kind": "response_too_large" })
            }
            FetchError::BodyRead(e) => serde_json::json!({
                "url": url,
                "kind": "body_read",
                "error": e.to_string(),
            }),
        }
    }
}

/// Conditional-request validators (ETag / Last-Modified).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        Self {
            etag: text(ETAG),
            last_modified: text(LAST_MODIFIED),
        }
    }
}

/// Outcome of a successful fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Server answered 304: upstream unchanged, nothing to parse
    NotModified,
    /// Fresh body, plus the response's validators for the next fetch
    Fetched {
        body: Vec<u8>,
        validators: CacheValidators,
    },
}

/// HTTP client shared by all feed workers.
///
/// Total in-flight requests are bounded by an internal semaphore; per-host
/// keep-alive connections by reqwest's pool cap. Both are configured once at
/// construction.
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    max_response_bytes: usize,
}

impl FetchClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gleaner/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit))
            .pool_max_idle_per_host(config.max_connections_per_host)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_syncs)),
            max_response_bytes: config.max_response_bytes as usize,
        })
    }

    /// Fetch a URL, sending conditional headers from the stored validators.
    ///
    /// `304 Not Modified` is a success (`FetchOutcome::NotModified`), not an
    /// error. Any other non-2xx status, transport error, or timeout becomes a
    /// [`FetchError`].
    pub async fn fetch(
        &self,
        url: &str,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError> {
        // Invariant: the semaphore lives as long as the client and is never closed
        let _permit = self
            .in_flight
            .acquire()
            .await
            .expect("fetch semaphore never closed");

        let mut request = self.client.get(url);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                detail: redacted_detail(url, status.as_u16(), response.headers()),
            });
        }

        let new_validators = CacheValidators::from_headers(response.headers());
        let body = read_limited_bytes(response, self.max_response_bytes).await?;

        Ok(FetchOutcome::Fetched {
            body,
            validators: new_validators,
        })
    }
}

/// Header snapshot safe to persist: URL, status, content-type and
/// content-length only. Response bodies and anything credential-shaped stay
/// out of the database.
fn redacted_detail(url: &str, status: u16, headers: &HeaderMap) -> serde_json::Value {
    serde_json::json!({
        "url": url,
        "status": status,
        "content_type": headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        "content_length": headers.get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()),
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: trust Content-Length when present
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::BodyRead)?;
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
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn test_client() -> FetchClient {
        FetchClient::new(&Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
            )
            .mount(&mock_server)
            .await;

        let client = test_client();
        let outcome = client
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                &CacheValidators::default(),
            )
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Fetched { body, validators } => {
                assert_eq!(body, VALID_RSS.as_bytes());
                assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
                assert_eq!(
                    validators.last_modified.as_deref(),
                    Some("Mon, 01 Jan 2024 00:00:00 GMT")
                );
            }
            other => panic!("Expected Fetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_conditional_headers() {
        let mock_server = MockServer::start().await;
        // The stock header matcher splits values on commas, which mangles
        // RFC 1123 dates; match the raw header bytes instead.
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(|request: &wiremock::Request| {
                request
                    .headers
                    .get("If-Modified-Since")
                    .and_then(|v| v.to_str().ok())
                    == Some("Mon, 01 Jan 2024 00:00:00 GMT")
            })
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client();
        let validators = CacheValidators {
            etag: Some("\"v1\"".to_string()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
        };
        let outcome = client
            .fetch(&format!("{}/feed", mock_server.uri()), &validators)
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::NotModified));
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).insert_header("Content-Type", "text/html"))
            .mount(&mock_server)
            .await;

        let client = test_client();
        let err = client
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                &CacheValidators::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        let detail = err.detail(&format!("{}/feed", mock_server.uri()));
        assert_eq!(detail["status"], 404);
        assert_eq!(detail["content_type"], "text/html");
        // No response body leaks into the payload
        assert!(detail.get("body").is_none());
    }

    #[tokio::test]
    async fn test_fetch_500_is_error_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1) // exactly one attempt; retry is the next scheduled cycle
            .mount(&mock_server)
            .await;

        let client = test_client();
        let err = client
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                &CacheValidators::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_fetch_response_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&mock_server)
            .await;

        let mut config = Config::default();
        config.max_response_bytes = 1024;
        let client = FetchClient::new(&config).unwrap();

        let err = client
            .fetch(
                &format!("{}/feed", mock_server.uri()),
                &CacheValidators::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error() {
        let client = test_client();
        // Port 1 on localhost: nothing listens there
        let err = client
            .fetch("http://127.0.0.1:1/feed", &CacheValidators::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
