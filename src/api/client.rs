//! HTTP client and request executor shared by every repository.
//!
//! [`HttpClient`] is the `reqwest` transport: it owns TLS configuration
//! (custom CA bundles) and turns a request into raw status/headers/body.
//! [`RequestExecutor`] sits on top of any [`Transport`] and applies the retry
//! and status policy: transport failures are retried immediately up to a fixed
//! attempt count, non-success statuses and decode failures are not.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default number of attempts per request.
pub const HTTP_RETRY: u32 = 5;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("API responded with status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unable to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{0}")]
    Config(String),
}

impl ApiError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Authorization attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// No `Authorization` header.
    None,
    /// Pre-encoded `base64(user:password)`.
    Basic(String),
    Bearer(String),
}

/// A GET request as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: String,
    pub auth: Authorization,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: Authorization::None,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn auth(mut self, auth: Authorization) -> Self {
        self.auth = auth;
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a `Range` header for the end-exclusive window `[start, end)`.
    pub fn range(self, start: u64, end: u64) -> Self {
        let last = end.saturating_sub(1).max(start);
        self.header("Range", &format!("bytes={}-{}", start, last))
    }

    /// Look up a header previously added to this request.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response returned by a transport.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200 || self.status == 206
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Sends a single request with no retry or status interpretation.
///
/// Implementations return `ApiError::Transport` when no response was
/// obtained and `Ok` for any HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;

    /// Check that `url` answers at all (any status counts as reachable).
    async fn probe(&self, url: &str) -> Result<(), ApiError>;
}

/// `reqwest`-backed transport.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client trusting the system roots plus every PEM bundle given.
    pub fn new(cert_paths: &[PathBuf], timeout: Duration) -> Result<Self, ApiError> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10));

        for path in cert_paths {
            let pem = std::fs::read(path).map_err(|e| {
                ApiError::Config(format!(
                    "Failed to read certificate bundle {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                ApiError::Config(format!(
                    "Invalid certificate bundle {}: {}",
                    path.display(),
                    e
                ))
            })?;
            builder = builder.add_root_certificate(cert);
            log::debug!("Trusting certificates from {}", path.display());
        }

        let client = builder
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let transport_err = |e: reqwest::Error| ApiError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let mut builder = self
            .client
            .get(&request.url)
            .header(CONTENT_TYPE, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.auth {
            Authorization::None => builder,
            Authorization::Basic(token) => builder.header(AUTHORIZATION, format!("Basic {}", token)),
            Authorization::Bearer(token) => builder.bearer_auth(token),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.send().await.map_err(transport_err)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(transport_err)?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    async fn probe(&self, url: &str) -> Result<(), ApiError> {
        self.client
            .head(url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ApiError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

// ── RequestExecutor ───────────────────────────────────────────────────────────

/// Bounded-retry GET executor shared by all repositories.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    attempts: u32,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, attempts: u32) -> Self {
        Self {
            transport,
            attempts: attempts.max(1),
        }
    }

    /// Send `request`, retrying transport failures immediately.
    ///
    /// Statuses other than 200/206 become `ApiError::Status` without retry.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(request).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) => {
                    return Err(ApiError::Status {
                        url: request.url.clone(),
                        status: resp.status,
                    })
                }
                Err(e @ ApiError::Transport { .. }) if attempt < self.attempts => {
                    log::debug!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        self.attempts,
                        request.url,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let resp = self.execute(request).await?;
        serde_json::from_slice(&resp.body).map_err(|e| ApiError::Decode {
            url: request.url.clone(),
            message: e.to_string(),
        })
    }

    /// Execute and return the raw body.
    pub async fn get_bytes(&self, request: &ApiRequest) -> Result<Vec<u8>, ApiError> {
        Ok(self.execute(request).await?.body)
    }

    /// Check that `url` is reachable.
    pub async fn probe(&self, url: &str) -> Result<(), ApiError> {
        self.transport.probe(url).await
    }
}
