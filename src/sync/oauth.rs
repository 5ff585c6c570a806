//! OAuth access-token upkeep for token-bearing adapters.
//!
//! Before each page an adapter calls [`ensure_fresh_token`]: the stored
//! settings are loaded, and an access token that is expired (or within 60
//! seconds of expiry) is exchanged for a fresh pair which is sealed back into
//! the integration settings before the adapter proceeds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, SyncError};
use crate::integrations::IntegrationStore;

/// Seconds before expiry at which a token is already treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Assumed lifetime when a token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokens {
    /// No recorded expiry counts as expired, so the first run refreshes.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => at <= Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS),
        }
    }
}

/// Provider settings that embed an OAuth token pair.
pub trait OAuthSettings: Serialize + DeserializeOwned + Send {
    fn tokens(&self) -> &OAuthTokens;
    fn tokens_mut(&mut self) -> &mut OAuthTokens;
}

/// Response of a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Some providers rotate the refresh token; `None` keeps the old one.
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError>;
}

/// Load `provider`'s settings with a usable access token, refreshing and
/// persisting the token pair first when needed.
///
/// Fails with [`SyncError::ReauthRequired`] before any network call when the
/// token is expired and no refresh token is stored.
pub async fn ensure_fresh_token<S: OAuthSettings>(
    store: &IntegrationStore,
    provider: &str,
    refresher: &dyn TokenRefresher,
) -> Result<S, SyncError> {
    let _guard = store.refresh_lock().lock().await;

    // Reload under the lock: a concurrent run may have refreshed already.
    let mut settings: S = store.load_settings(provider)?;
    if !settings.tokens().is_expired() {
        return Ok(settings);
    }

    let refresh_token = settings
        .tokens()
        .refresh_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SyncError::ReauthRequired {
            provider: provider.to_string(),
        })?;

    log::info!("{}: access token expired, refreshing", provider);
    let refreshed = refresher
        .refresh(&refresh_token)
        .await
        .map_err(|e| SyncError::provider(provider, e))?;

    let expires_in = refreshed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    let tokens = settings.tokens_mut();
    tokens.access_token = refreshed.access_token;
    if let Some(rotated) = refreshed.refresh_token {
        tokens.refresh_token = Some(rotated);
    }
    tokens.expires_at = Some(Utc::now() + Duration::seconds(expires_in as i64));

    store.save_settings(provider, &settings)?;
    log::info!("{}: refreshed access token persisted", provider);
    Ok(settings)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Refresher that returns a fixed token and counts calls.
    pub struct FakeRefresher {
        pub calls: AtomicUsize,
        pub fail_with: Option<u16>,
    }

    impl FakeRefresher {
        pub fn ok() -> Self {
            Self { calls: AtomicUsize::new(0), fail_with: None }
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_with {
                Some(400) => Err(ProviderError::RefreshRevoked),
                Some(status) => Err(ProviderError::RefreshFailed(format!("HTTP {}", status))),
                None => Ok(RefreshedTokens {
                    access_token: format!("access-{}", n),
                    refresh_token: Some(format!("{}-rotated", refresh_token)),
                    expires_in: Some(1800),
                }),
            }
        }
    }
}
