use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::db::DbIntegration;
use crate::error::SyncError;
use crate::providers::harvest::{self, HarvestSettings};
use crate::providers::hubspot::{self, HubSpotSettings};
use crate::providers::sheets::{self, SheetsSettings};
use crate::state::AppState;

/// Parse raw settings into the provider's typed form so a malformed blob is
/// rejected here rather than on the first sync.
fn typed<T: DeserializeOwned + Serialize>(
    provider: &str,
    raw: serde_json::Value,
) -> Result<T, SyncError> {
    serde_json::from_value(raw).map_err(|e| SyncError::InvalidSettings {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

/// Store sealed settings for `provider` and set its enabled flag.
pub fn connect(
    state: &AppState,
    provider: &str,
    settings: serde_json::Value,
    enabled: bool,
    actor: &str,
) -> Result<(), SyncError> {
    let store = &state.integrations;
    match provider {
        harvest::PROVIDER => store.save_settings(provider, &typed::<HarvestSettings>(provider, settings)?)?,
        hubspot::PROVIDER => store.save_settings(provider, &typed::<HubSpotSettings>(provider, settings)?)?,
        sheets::PROVIDER => store.save_settings(provider, &typed::<SheetsSettings>(provider, settings)?)?,
        other => {
            return Err(SyncError::InvalidSettings {
                provider: other.to_string(),
                message: "unknown provider".to_string(),
            })
        }
    }
    store.set_enabled(provider, enabled)?;

    log::info!("Integration {} connected (enabled: {})", provider, enabled);
    crate::audit::record(
        &state.db.lock(),
        actor,
        "integration.connect",
        provider,
        Some(&json!({ "enabled": enabled })),
    );
    Ok(())
}

pub fn set_enabled(
    state: &AppState,
    provider: &str,
    enabled: bool,
    actor: &str,
) -> Result<(), SyncError> {
    state.integrations.set_enabled(provider, enabled)?;
    let action = if enabled { "integration.enable" } else { "integration.disable" };
    crate::audit::record(&state.db.lock(), actor, action, provider, None);
    Ok(())
}

/// Every integration row. Settings stay sealed and are not serialized.
pub fn list(state: &AppState) -> Result<Vec<DbIntegration>, SyncError> {
    state.integrations.list()
}
