// HTTP plumbing shared by the embedding clients and the remote vector stores
// Requests are blocking (ureq) and run on Tokio's blocking pool

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_BACKOFF_MILLIS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("Failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Request task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Delete,
    Post,
    Put,
}

/// Status and body of a completed request. Non-2xx statuses are returned here,
/// not raised, so callers can map them onto index states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[inline]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: Url,
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
    retry_attempts: u32,
    backoff: Duration,
}

impl RestClient {
    /// Build a client rooted at `base_url`. Relative paths passed to the request
    /// methods are appended to the base path.
    #[inline]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            base_url,
            agent: Self::build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            headers: Vec::new(),
            retry_attempts: 1,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MILLIS),
        }
    }

    #[inline]
    pub fn parse(base_url: &str) -> Result<Self, RestError> {
        let url = Url::parse(base_url).map_err(|_| RestError::InvalidUrl(base_url.to_string()))?;
        Ok(Self::new(url))
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles on each subsequent attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[inline]
    pub async fn get(&self, path: &str) -> Result<RestResponse, RestError> {
        self.send(Method::Get, path, None).await
    }

    #[inline]
    pub async fn delete(&self, path: &str) -> Result<RestResponse, RestError> {
        self.send(Method::Delete, path, None).await
    }

    #[inline]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<RestResponse, RestError> {
        let body = serde_json::to_string(body)?;
        self.send(Method::Post, path, Some(body)).await
    }

    #[inline]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<RestResponse, RestError> {
        let body = serde_json::to_string(body)?;
        self.send(Method::Put, path, Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<RestResponse, RestError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|_| RestError::InvalidUrl(format!("{}{}", self.base_url, path)))?;

        let client = self.clone();
        tokio::task::spawn_blocking(move || client.execute_with_retry(method, &url, body.as_deref()))
            .await
            .map_err(|e| RestError::Join(e.to_string()))?
    }

    fn execute_once(
        &self,
        method: Method,
        url: &Url,
        body: Option<&str>,
    ) -> Result<RestResponse, ureq::Error> {
        let mut response = match method {
            Method::Get => self.apply_headers(self.agent.get(url.as_str())).call()?,
            Method::Delete => self.apply_headers(self.agent.delete(url.as_str())).call()?,
            Method::Post => self
                .apply_headers(self.agent.post(url.as_str()))
                .header("Content-Type", "application/json")
                .send(body.unwrap_or_default())?,
            Method::Put => self
                .apply_headers(self.agent.put(url.as_str()))
                .header("Content-Type", "application/json")
                .send(body.unwrap_or_default())?,
        };

        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string()?;
        Ok(RestResponse { status, body })
    }

    fn apply_headers<B>(&self, mut request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    fn execute_with_retry(
        &self,
        method: Method,
        url: &Url,
        body: Option<&str>,
    ) -> Result<RestResponse, RestError> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "{:?} {} attempt {}/{}",
                method, url, attempt, self.retry_attempts
            );

            match self.execute_once(method, url, body) {
                Ok(response) if response.status >= 500 => {
                    warn!(
                        "Server error (status {}) from {}, attempt {}/{}",
                        response.status, url, attempt, self.retry_attempts
                    );
                    last_error = Some(Ok(response));
                }
                Ok(response) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response);
                }
                Err(error) => {
                    let retryable = matches!(
                        error,
                        ureq::Error::ConnectionFailed
                            | ureq::Error::HostNotFound
                            | ureq::Error::Timeout(_)
                            | ureq::Error::Io(_)
                    );

                    if !retryable {
                        warn!("Non-retryable error from {}: {}", url, error);
                        return Err(RestError::Transport {
                            url: url.to_string(),
                            message: error.to_string(),
                        });
                    }

                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(Err(RestError::Transport {
                        url: url.to_string(),
                        message: error.to_string(),
                    }));
                }
            }

            if attempt < self.retry_attempts {
                let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!(
            "All {} attempts failed for request to {}",
            self.retry_attempts, url
        );

        // A final 5xx is handed back so the caller can report the server's message
        last_error.unwrap_or_else(|| {
            Err(RestError::Transport {
                url: url.to_string(),
                message: "request failed after retries".to_string(),
            })
        })
    }
}
