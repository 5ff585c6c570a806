//! Typed access to per-provider integration settings.
//!
//! Settings are stored sealed (see [`crate::crypto`]); plaintext only exists
//! in memory while a caller holds the typed value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::ConfigCipher;
use crate::db::{DbIntegration, SharedDb};
use crate::error::SyncError;

#[derive(Clone)]
pub struct IntegrationStore {
    db: SharedDb,
    cipher: Arc<ConfigCipher>,
    /// Serializes OAuth refreshes so two runs never spend one refresh token.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl IntegrationStore {
    pub fn new(db: SharedDb, cipher: Arc<ConfigCipher>) -> Self {
        Self {
            db,
            cipher,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    pub(crate) fn refresh_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.refresh_lock
    }

    /// Decrypt and deserialize a provider's settings.
    pub fn load_settings<T: DeserializeOwned>(&self, provider: &str) -> Result<T, SyncError> {
        let sealed = {
            let db = self.db.lock();
            db.get_integration(provider)?
                .and_then(|row| row.settings)
                .ok_or_else(|| SyncError::NotConfigured(provider.to_string()))?
        };
        self.cipher
            .open_json(provider, &sealed)
            .map_err(|e| match e {
                crate::crypto::CryptoError::Json(err) => SyncError::InvalidSettings {
                    provider: provider.to_string(),
                    message: err.to_string(),
                },
                other => SyncError::Crypto(other),
            })
    }

    /// Serialize, encrypt and persist a provider's settings.
    pub fn save_settings<T: Serialize>(&self, provider: &str, settings: &T) -> Result<(), SyncError> {
        let sealed = self.cipher.seal_json(provider, settings)?;
        self.db.lock().save_integration_settings(provider, &sealed)?;
        Ok(())
    }

    pub fn is_enabled(&self, provider: &str) -> Result<bool, SyncError> {
        Ok(self
            .db
            .lock()
            .get_integration(provider)?
            .map(|row| row.enabled)
            .unwrap_or(false))
    }

    pub fn set_enabled(&self, provider: &str, enabled: bool) -> Result<(), SyncError> {
        self.db.lock().set_integration_enabled(provider, enabled)?;
        Ok(())
    }

    /// Completion time of the last run, used as the lower bound of an
    /// incremental sync.
    pub fn last_sync_at(&self, provider: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let raw = self
            .db
            .lock()
            .get_integration(provider)?
            .and_then(|row| row.last_sync_at);
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }))
    }

    pub fn list(&self) -> Result<Vec<DbIntegration>, SyncError> {
        Ok(self.db.lock().list_integrations()?)
    }
}
