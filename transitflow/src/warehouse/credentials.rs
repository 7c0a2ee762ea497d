//! OAuth access tokens for the BigQuery REST API.
//!
//! Google access tokens live for about an hour, so the warehouse never holds
//! a bare string. It asks a [`TokenCache`] before every request; the cache
//! goes back to its [`TokenSource`] once the token is close to expiry or
//! after the API rejected it.

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::utils::Timestamp;

/// OAuth scope needed for queries and load jobs.
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

/// A bearer token and, when known, the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer value.
    pub value: String,
    /// Expiry; `None` for tokens of unknown lifetime.
    pub expires_at: Option<Timestamp>,
}

impl AccessToken {
    fn is_fresh(&self, now: Timestamp) -> bool {
        self.expires_at
            .map_or(true, |at| now + Duration::seconds(REFRESH_MARGIN_SECS) < at)
    }
}

/// Where access tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug {
    /// Obtains a new token.
    async fn fetch(&self) -> Result<AccessToken, String>;
}

/// A token handed over in configuration. It cannot be renewed.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a bearer value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn fetch(&self) -> Result<AccessToken, String> {
        Ok(AccessToken {
            value: self.0.clone(),
            expires_at: None,
        })
    }
}

/// Tokens minted from a service-account key file.
pub struct ServiceAccount {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl ServiceAccount {
    /// Reads a service-account JSON key.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let account = gcp_auth::CustomServiceAccount::from_file(path).map_err(|e| {
            ConfigError::Invalid(format!(
                "cannot use credentials file {}: {e}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), "Using service-account credentials");
        Ok(Self {
            provider: Arc::new(account),
        })
    }
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ServiceAccount {
    async fn fetch(&self) -> Result<AccessToken, String> {
        let token = self
            .provider
            .token(&[BIGQUERY_SCOPE])
            .await
            .map_err(|e| format!("could not obtain access token: {e}"))?;
        Ok(AccessToken {
            value: token.as_str().to_string(),
            expires_at: Some(token.expires_at()),
        })
    }
}

/// Hands out the current token, renewing it when needed.
#[derive(Debug)]
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    /// Creates an empty cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: Mutex::new(None),
        }
    }

    /// Returns a token that is still valid at `now`.
    pub async fn token(&self, now: Timestamp) -> Result<String, String> {
        let cached = self
            .current
            .lock()
            .as_ref()
            .filter(|t| t.is_fresh(now))
            .map(|t| t.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }

        let token = self.source.fetch().await?;
        debug!(expires_at = ?token.expires_at, "Fetched access token");
        let value = token.value.clone();
        *self.current.lock() = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub fn invalidate(&self) {
        self.current.lock().take();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::utils::{Clock, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Issues `token-1`, `token-2`, ... each valid for `lifetime` from `clock`.
    #[derive(Debug)]
    pub(crate) struct CountingSource {
        pub(crate) clock: ManualClock,
        pub(crate) lifetime: Option<Duration>,
        pub(crate) fetches: AtomicUsize,
    }

    impl CountingSource {
        pub(crate) fn new(clock: ManualClock, lifetime: Option<Duration>) -> Self {
            Self {
                clock,
                lifetime,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> Result<AccessToken, String> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                value: format!("token-{n}"),
                expires_at: self.lifetime.map(|l| self.clock.now() + l),
            })
        }
    }

    #[tokio::test]
    async fn test_token_reused_until_near_expiry() {
        let clock = fixtures::frozen_clock();
        let source = Arc::new(CountingSource::new(clock.clone(), Some(Duration::hours(1))));
        let cache = TokenCache::new(source.clone());

        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-1");
        clock.advance(Duration::minutes(58));
        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-1");
        clock.advance(Duration::seconds(90));
        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-2");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let clock = fixtures::frozen_clock();
        let source = Arc::new(CountingSource::new(clock.clone(), None));
        let cache = TokenCache::new(source);

        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-1");
        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-1");
        cache.invalidate();
        assert_eq!(cache.token(clock.now()).await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_static_token_never_expires() {
        let token = StaticToken::new("ya29.fixed").fetch().await.unwrap();
        assert_eq!(token.value, "ya29.fixed");
        assert!(token.is_fresh(fixtures::noon() + Duration::days(365)));
        assert_eq!(format!("{:?}", StaticToken::new("secret")), "StaticToken(..)");
    }

    #[test]
    fn test_unreadable_key_file_is_config_error() {
        let err = ServiceAccount::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
