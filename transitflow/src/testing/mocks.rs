//! Scripted upstream transport for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{HttpResponse, Transport};
use crate::errors::TransportError;

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// `GET` or `POST`.
    pub method: &'static str,
    /// Full URL without query string.
    pub url: String,
    /// Query parameters in order.
    pub query: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Script {
    logins: VecDeque<Result<HttpResponse, String>>,
    gets: VecDeque<Result<HttpResponse, String>>,
    calls: Vec<RecordedCall>,
    latency: Duration,
}

/// A transport that replays queued responses and records every call.
///
/// Logins and GETs have separate queues. An exhausted login queue answers
/// `true`; an exhausted GET queue answers `200 []`. Clones share state, so a
/// test can keep a handle after moving a clone into a client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next login.
    pub fn push_login(&self, response: HttpResponse) {
        self.script.lock().logins.push_back(Ok(response));
    }

    /// Queues a network failure for the next login.
    pub fn push_login_error(&self, message: impl Into<String>) {
        self.script.lock().logins.push_back(Err(message.into()));
    }

    /// Queues the answer to the next GET.
    pub fn push_get(&self, response: HttpResponse) {
        self.script.lock().gets.push_back(Ok(response));
    }

    /// Queues a network failure for the next GET.
    pub fn push_get_error(&self, message: impl Into<String>) {
        self.script.lock().gets.push_back(Err(message.into()));
    }

    /// Makes every call take `latency` of (tokio) time.
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    /// Every call seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().calls.clone()
    }

    /// Number of login calls.
    #[must_use]
    pub fn login_count(&self) -> usize {
        self.count("POST")
    }

    /// Number of GET calls.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.count("GET")
    }

    fn count(&self, method: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    async fn record(&self, method: &'static str, url: &str, query: &[(&str, &str)]) {
        let latency = self.script.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.script.lock().calls.push(RecordedCall {
            method,
            url: url.to_string(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        self.record("POST", url, query).await;
        let next = self.script.lock().logins.pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::new(url, message)),
            None => Ok(HttpResponse::new(200, "true")),
        }
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        self.record("GET", url, query).await;
        let next = self.script.lock().gets.pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::new(url, message)),
            None => Ok(HttpResponse::new(200, "[]")),
        }
    }
}
