//! HTTP transport seam for the upstream API.

use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

use crate::config::{ApiConfig, ProxyConfig};
use crate::errors::TransportError;

/// Status and body of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status signals an expired or missing session.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Protocol for issuing requests against the upstream API.
///
/// Implementations keep whatever credential state the login call sets
/// (cookies for the real API) between calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a POST with query parameters and no body.
    async fn post(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;

    /// Issues a GET with query parameters.
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;
}

/// Cookie-carrying reqwest transport.
///
/// One instance per pipeline; the login cookie lives in its cookie store.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport with the configured timeout and optional proxy.
    pub fn new(api: &ApiConfig, proxy: Option<&ProxyConfig>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(api.timeout())
            .user_agent(concat!("transitflow/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy {
            if let Some(ref url) = proxy.http {
                let p = reqwest::Proxy::http(url)
                    .map_err(|e| TransportError::from_reqwest(url, &e))?;
                builder = builder.proxy(p);
            }
            if let Some(ref url) = proxy.https {
                let p = reqwest::Proxy::https(url)
                    .map_err(|e| TransportError::from_reqwest(url, &e))?;
                builder = builder.proxy(p);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::from_reqwest(&api.base_url, &e))?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<HttpResponse, TransportError> {
        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(url, &e))?;
        debug!(
            url,
            status,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Upstream request finished"
        );
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        self.send(self.client.post(url).query(query), url).await
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        self.send(self.client.get(url).query(query), url).await
    }
}
