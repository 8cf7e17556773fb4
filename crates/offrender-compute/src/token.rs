//! Access tokens for the Compute Engine API.
//!
//! [`TokenCache`] wraps a `gcp_auth` provider with:
//! - Refresh margin to avoid token expiry during long operation waits
//! - Single-flight refresh under a write lock
//! - Fallback to the existing token if a refresh fails while it is still usable

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ComputeError, ComputeResult};

/// Refresh 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// TTL used when the provider reports no usable expiry.
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for instance management.
pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// Source of bearer tokens for API requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a currently valid access token.
    async fn access_token(&self) -> ComputeResult<String>;

    /// Drop any cached token so the next call fetches a fresh one.
    async fn invalidate(&self) {}
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Thread-safe token cache with single-flight refresh.
pub struct TokenCache {
    auth: Arc<dyn TokenProvider>,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            auth,
            cache: RwLock::new(None),
        }
    }

    /// Build a cache backed by a service account key file.
    pub fn from_credentials_file(path: &Path) -> ComputeResult<Self> {
        let account = CustomServiceAccount::from_file(path).map_err(|e| {
            ComputeError::auth_error(format!(
                "Failed to load service account {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(Arc::new(account)))
    }

    async fn refresh_token(&self, cache: &mut Option<CachedToken>) -> ComputeResult<String> {
        match self.auth.token(&[COMPUTE_SCOPE]).await {
            Ok(token) => {
                let access_token = token.as_str().to_string();

                let expires_at = {
                    let now = Utc::now();
                    let exp = token.expires_at();
                    if exp > now {
                        match (exp - now).to_std() {
                            Ok(ttl) => Instant::now() + ttl,
                            Err(_) => Instant::now() + TOKEN_DEFAULT_TTL,
                        }
                    } else {
                        Instant::now()
                    }
                };

                *cache = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });

                debug!("Refreshed compute auth token");
                Ok(access_token)
            }
            Err(e) => {
                if let Some(cached) = cache.as_ref() {
                    if cached.is_usable() {
                        warn!("Token refresh failed, using existing token: {}", e);
                        return Ok(cached.access_token.clone());
                    }
                }

                Err(ComputeError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                )))
            }
        }
    }
}

#[async_trait]
impl TokenSource for TokenCache {
    async fn access_token(&self) -> ComputeResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        self.refresh_token(&mut cache).await
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

/// Fixed token, for emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> ComputeResult<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_scope() {
        assert!(COMPUTE_SCOPE.ends_with("/auth/compute"));
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken("abc".into());
        source.invalidate().await;
        assert_eq!(source.access_token().await.unwrap(), "abc");
    }

    #[test]
    fn test_missing_credentials_file() {
        let result = TokenCache::from_credentials_file(Path::new("/nonexistent/key.json"));
        assert!(matches!(result, Err(ComputeError::AuthError(_))));
    }
}
