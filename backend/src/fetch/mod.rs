//! HTTP fetching with allow-list enforcement and 429 backoff.
//!
//! ```text
//!            ┌──────────────┐  2xx                ┌───────────┐
//!   ───────▶ │ Attempting n │ ──────────────────▶ │ Succeeded │
//!            └──────────────┘                     └───────────┘
//!              │ 429, n < max        │ other / 429, n == max
//!              ▼                     ▼
//!            ┌──────────────┐     ┌────────┐
//!            │  Backoff n   │     │ Failed │
//!            └──────────────┘     └────────┘
//!              │ sleep(delay)
//!              └──────▶ Attempting n+1
//! ```
//!
//! The state machine ([`RetryPolicy::next`]) is pure; [`RetryingFetcher`] drives it
//! over an [`HttpTransport`].

pub mod retry;

use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DatasetError, FetchError, FetchResult, FormatError};
use crate::models::ResourceFormat;

pub use retry::{AttemptOutcome, RetryPolicy, RetryState};

/// Hosts allowed when none are configured.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "opendata.schleswig-holstein.de",
    "efi2.schleswig-holstein.de",
    "geoservice.norderstedt.de",
    "hsi-sh.de",
];

// =============================================================================
// Transport
// =============================================================================

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One GET, no retries. Implemented over reqwest in production and by canned
/// responses in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> FetchResult<HttpResponse>;
}

/// reqwest-backed transport with a bounded per-request deadline.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("geomerge/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> FetchResult<HttpResponse> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            content_type,
            body: body.to_vec(),
        })
    }
}

// =============================================================================
// Allow-list
// =============================================================================

/// Fixed set of hosts requests may target.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.into().trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.hosts.iter().any(|allowed| *allowed == host)
    }

    /// Fail with [`FetchError::HostNotAllowed`] unless `host` is listed.
    pub fn check_host(&self, host: &str) -> FetchResult<()> {
        if self.is_allowed(host) {
            Ok(())
        } else {
            Err(FetchError::HostNotAllowed(host.to_string()))
        }
    }

    /// Parse `url` and check its host.
    pub fn check_url(&self, url: &str) -> FetchResult<()> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            message: "missing host".to_string(),
        })?;
        self.check_host(host)
    }
}

impl Default for HostAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS.iter().copied())
    }
}

// =============================================================================
// Retrying Fetcher
// =============================================================================

/// GET with allow-list check and exponential backoff on HTTP 429.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    allow_list: HostAllowList,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
        allow_list: HostAllowList,
    ) -> Self {
        Self {
            transport,
            policy,
            allow_list,
        }
    }

    pub fn allow_list(&self) -> &HostAllowList {
        &self.allow_list
    }

    /// GET `url`, retrying 429 responses per the policy. Returns the first
    /// successful response.
    pub async fn fetch(&self, url: &str) -> FetchResult<HttpResponse> {
        self.allow_list.check_url(url)?;

        let mut state = RetryState::Attempting(0);
        loop {
            match state {
                RetryState::Attempting(attempt) => {
                    debug!(url = %url, attempt, "GET");
                    let response = self.transport.get(url).await?;
                    let outcome = AttemptOutcome::from_status(response.status);
                    state = self.policy.next(state, outcome);
                    match state {
                        RetryState::Succeeded => return Ok(response),
                        RetryState::Failed => {
                            return Err(if outcome == AttemptOutcome::RateLimited {
                                FetchError::RateLimited {
                                    attempts: attempt + 1,
                                }
                            } else {
                                FetchError::Status {
                                    status: response.status,
                                    message: failure_message(&response),
                                }
                            });
                        }
                        _ => {}
                    }
                }
                RetryState::Backoff(retry, delay) => {
                    warn!(
                        url = %url,
                        retry,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    state = self.policy.next(state, AttemptOutcome::Success);
                }
                RetryState::Succeeded | RetryState::Failed => {
                    return Err(FetchError::Request(format!(
                        "retry loop for '{}' ended without a response",
                        url
                    )));
                }
            }
        }
    }

    /// Download a resource and check it looks like `format`.
    pub async fn download(
        &self,
        url: &str,
        format: ResourceFormat,
    ) -> Result<Vec<u8>, DatasetError> {
        let response = self.fetch(url).await?;
        if !format.accepts(url, response.content_type.as_deref()) {
            return Err(FormatError::Unsupported(format!(
                "{} expected but '{}' served {}",
                format,
                url,
                response.content_type.as_deref().unwrap_or("no content type")
            ))
            .into());
        }
        info!(url = %url, format = %format, bytes = response.body.len(), "Downloaded resource");
        Ok(response.body)
    }
}

fn failure_message(response: &HttpResponse) -> String {
    let reason = if response.reason.is_empty() {
        "request failed"
    } else {
        response.reason.as_str()
    };
    format!("Failed to fetch resource: {}", reason)
}

// =============================================================================
// Test double
// =============================================================================


#[cfg(test)]
mod tests {
    use super::testing::{fetcher, StaticTransport};
    use super::*;

    const CSV_URL: &str = "https://opendata.schleswig-holstein.de/dataset/x/download/data.csv";

    #[test]
    fn test_allow_list() {
        let list = HostAllowList::default();
        assert!(list.is_allowed("opendata.schleswig-holstein.de"));
        assert!(list.is_allowed("HSI-SH.DE"));
        assert!(list.check_url("https://evil.example.com/a.csv").is_err());
        assert!(matches!(
            list.check_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_disallowed_host_makes_no_request() {
        let transport = Arc::new(StaticTransport::new());
        let fetcher = fetcher(transport.clone());

        let result = fetcher.fetch("https://example.org/data.csv").await;

        assert!(matches!(result, Err(FetchError::HostNotAllowed(h)) if h == "example.org"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retries_on_429_then_succeeds() {
        let transport = Arc::new(
            StaticTransport::new()
                .route(CSV_URL, 429, "text/plain", "")
                .route(CSV_URL, 429, "text/plain", "")
                .route(CSV_URL, 200, "text/csv", "a;b\n1;2"),
        );
        let fetcher = fetcher(transport.clone());

        let bytes = fetcher.download(CSV_URL, ResourceFormat::Csv).await.unwrap();

        assert_eq!(bytes, b"a;b\n1;2");
        assert_eq!(transport.calls_to(CSV_URL), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let transport = Arc::new(StaticTransport::new().route(CSV_URL, 429, "text/plain", ""));
        let fetcher = fetcher(transport.clone());

        let result = fetcher.fetch(CSV_URL).await;

        assert!(matches!(result, Err(FetchError::RateLimited { attempts: 4 })));
        assert_eq!(transport.calls_to(CSV_URL), 4);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let transport = Arc::new(StaticTransport::new().route(CSV_URL, 500, "text/plain", "boom"));
        let fetcher = fetcher(transport.clone());

        let result = fetcher.fetch(CSV_URL).await;

        assert!(matches!(result, Err(FetchError::Status { status: 500, .. })));
        assert_eq!(transport.calls_to(CSV_URL), 1);
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let url = "https://opendata.schleswig-holstein.de/download";
        let transport = Arc::new(StaticTransport::new().route(url, 200, "text/html", "<html>"));
        let fetcher = fetcher(transport);

        let result = fetcher.download(url, ResourceFormat::Csv).await;

        assert!(matches!(
            result,
            Err(DatasetError::Format(FormatError::Unsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_reqwest_transport_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = ReqwestTransport::new(Duration::from_millis(200)).unwrap();
        let url = format!("http://{}/slow.csv", addr);
        let result = transport.get(&url).await;

        assert!(matches!(result, Err(FetchError::Timeout(ref u)) if *u == url));
        server.abort();
    }
}
