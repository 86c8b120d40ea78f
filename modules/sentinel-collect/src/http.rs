use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use sentinel_common::SentinelError;
use tracing::{debug, warn};

const USER_AGENT: &str = "SentinelPi/0.1 (self-hosted monitoring station)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 3;

/// Pooled HTTP client shared across collectors and channels.
///
/// Transient failures (transport errors, 5xx) are retried with exponential
/// backoff (1s / 2s / 4s); 4xx responses are returned to the caller
/// immediately — they are not transient.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, SentinelError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SentinelError::Http(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Client with the default 30s request timeout. Building with static
    /// defaults cannot fail.
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .expect("default HTTP client configuration is valid")
    }

    /// Handle on the underlying pooled client, for components that talk to
    /// their own endpoints (notification channels).
    pub fn raw(&self) -> Client {
        self.client.clone()
    }

    pub async fn get(&self, url: &str) -> Result<Response, SentinelError> {
        self.get_with_headers(url, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Response, SentinelError> {
        self.request_with_retry(url, || {
            let mut req = self.client.get(url);
            for (name, value) in headers {
                req = req.header(name, value);
            }
            req
        })
        .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(String, String)],
    ) -> Result<Response, SentinelError> {
        self.request_with_retry(url, || {
            let mut req = self.client.post(url).json(body);
            for (name, value) in headers {
                req = req.header(name, value);
            }
            req
        })
        .await
    }

    pub async fn head(&self, url: &str) -> Result<StatusCode, SentinelError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| SentinelError::Http(format!("HEAD {url}: {e}")))?;
        Ok(response.status())
    }

    /// GET and return the body as text, treating any non-2xx status as an error.
    pub async fn get_text(&self, url: &str) -> Result<String, SentinelError> {
        let response = self.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SentinelError::Http(format!("GET {url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| SentinelError::Http(format!("reading body of {url}: {e}")))
    }

    /// GET and return the raw body bytes, treating any non-2xx status as an error.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, SentinelError> {
        let response = self.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SentinelError::Http(format!("GET {url}: HTTP {status}")));
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| SentinelError::Http(format!("reading body of {url}: {e}")))?
            .to_vec())
    }

    async fn request_with_retry(
        &self,
        url: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response, SentinelError> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << (attempt - 1));
                debug!(url, attempt, ?backoff, "Retrying request");
                tokio::time::sleep(backoff).await;
            }
            match build().send().await {
                Ok(response) if response.status().is_server_error() => {
                    warn!(url, status = %response.status(), attempt, "Server error, will retry");
                    last_error = Some(SentinelError::Http(format!(
                        "GET {url}: HTTP {}",
                        response.status()
                    )));
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(url, error = %e, attempt, "Request failed, will retry");
                    last_error = Some(SentinelError::Http(format!("{url}: {e}")));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| SentinelError::Http(format!("{url}: retries exhausted"))))
    }
}
