//! Shared application state: one store, one engine, one limiter per provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{ConfigCipher, CryptoError};
use crate::db::{DbError, OpsDb, SharedDb};
use crate::integrations::IntegrationStore;
use crate::providers::OAuthClient;
use crate::ratelimit::RateLimiters;
use crate::sync::SyncEngine;
use crate::types::{AppConfig, ConfigError, ProviderEndpoint};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open database: {0}")]
    Db(#[from] DbError),

    #[error("Invalid master key: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: SharedDb,
    pub integrations: IntegrationStore,
    pub limiters: Arc<RateLimiters>,
    pub engine: SyncEngine,
    pub http: reqwest::Client,
}

impl AppState {
    /// Open the configured database and wire up the engine.
    pub fn from_config(config: AppConfig) -> Result<Self, StartupError> {
        let cipher = ConfigCipher::from_encoded(&config.resolved_master_key()?)?;
        let db = match &config.database_path {
            Some(path) => OpsDb::open_at(PathBuf::from(path))?,
            None => OpsDb::open()?,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_parts(config, db, cipher, http))
    }

    pub fn with_parts(
        config: AppConfig,
        db: OpsDb,
        cipher: ConfigCipher,
        http: reqwest::Client,
    ) -> Self {
        let db = db.into_shared();
        let ttl = Duration::from_secs(config.progress_ttl_minutes.saturating_mul(60));
        Self {
            integrations: IntegrationStore::new(db.clone(), Arc::new(cipher)),
            limiters: Arc::new(RateLimiters::new(config.rate_limits.clone())),
            engine: SyncEngine::new(db.clone(), ttl),
            config: Arc::new(config),
            db,
            http,
        }
    }
}

/// App credentials for a provider's token endpoint, if configured.
pub fn oauth_client(endpoint: &ProviderEndpoint) -> Option<OAuthClient> {
    Some(OAuthClient {
        token_url: endpoint.token_url.clone()?,
        client_id: endpoint.client_id.clone()?,
        client_secret: endpoint.client_secret.clone(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::test_support::test_db;

    pub fn test_state() -> AppState {
        AppState::with_parts(
            AppConfig::default(),
            test_db(),
            ConfigCipher::new([7u8; 32]),
            reqwest::Client::new(),
        )
    }
}
