use crate::domain::ports::ClockRef;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Lazily refreshed OAuth bearer token for providers that require one.
///
/// Explicitly owned by the adapter that needs it and driven by an injected
/// clock, so tests can exercise expiry without touching process state.
pub struct AccessTokenCache {
    clock: ClockRef,
    inner: Mutex<Option<CachedToken>>,
}

impl AccessTokenCache {
    /// Tokens are treated as expired this long before the provider says so,
    /// to keep an in-flight request from racing the real expiry.
    const EARLY_EXPIRY_SECS: i64 = 60;

    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            inner: Mutex::new(None),
        }
    }

    /// Returns the cached token if still valid, otherwise invokes `refresh`
    /// for a fresh `(token, expires_in_secs)` pair and caches it.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut guard = self.inner.lock().await;
        let now = self.clock.now();

        if let Some(cached) = guard.as_ref()
            && now < cached.expires_at
        {
            return Ok(cached.token.clone());
        }

        let (token, expires_in_secs) = refresh().await?;
        let expires_at =
            now + Duration::seconds((expires_in_secs - Self::EARLY_EXPIRY_SECS).max(0));
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}
