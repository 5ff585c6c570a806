use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::SyncError;
use crate::providers::harvest::{self, HarvestClient, HarvestTimeEntriesAdapter, HarvestUsersAdapter};
use crate::providers::hubspot::{self, HubSpotClient, HubSpotCompaniesAdapter};
use crate::providers::sheets::{self, SheetsClient, SheetsFinancialsAdapter};
use crate::state::{oauth_client, AppState};
use crate::sync::{SyncKind, SyncStatus};

/// (provider, data kind) pairs with an adapter.
pub const SUPPORTED_SYNCS: &[(&str, &str)] = &[
    (harvest::PROVIDER, "time_entries"),
    (harvest::PROVIDER, "users"),
    (hubspot::PROVIDER, "companies"),
    (sheets::PROVIDER, "financials"),
];

/// Start a sync run and return its job id without waiting for it.
///
/// Must be called inside a Tokio runtime.
pub fn trigger_sync(
    state: &AppState,
    provider: &str,
    data_kind: &str,
    sync_kind: SyncKind,
    actor: &str,
) -> Result<String, SyncError> {
    if !SUPPORTED_SYNCS.contains(&(provider, data_kind)) {
        return Err(SyncError::UnknownAdapter {
            provider: provider.to_string(),
            data_kind: data_kind.to_string(),
        });
    }
    if !state.integrations.is_enabled(provider)? {
        return Err(SyncError::IntegrationDisabled(provider.to_string()));
    }

    let store = state.integrations.clone();
    let limiter = state.limiters.for_provider(provider);
    let endpoints = &state.config.providers;

    let job_id = match provider {
        harvest::PROVIDER => {
            let api = Arc::new(HarvestClient::new(state.http.clone(), &endpoints.harvest.base_url));
            if data_kind == "users" {
                let adapter = HarvestUsersAdapter::new(api, store, limiter);
                state.engine.run(Arc::new(adapter), sync_kind, actor)?
            } else {
                let adapter = HarvestTimeEntriesAdapter::new(api, store, limiter);
                state.engine.run(Arc::new(adapter), sync_kind, actor)?
            }
        }
        hubspot::PROVIDER => {
            let client = Arc::new(HubSpotClient::new(
                state.http.clone(),
                &endpoints.hubspot.base_url,
                oauth_client(&endpoints.hubspot),
            ));
            let adapter = HubSpotCompaniesAdapter::new(client.clone(), client, store, limiter);
            state.engine.run(Arc::new(adapter), sync_kind, actor)?
        }
        _ => {
            let client = Arc::new(SheetsClient::new(
                state.http.clone(),
                &endpoints.sheets.base_url,
                oauth_client(&endpoints.sheets),
            ));
            let adapter = SheetsFinancialsAdapter::new(client.clone(), client, store, limiter);
            state.engine.run(Arc::new(adapter), sync_kind, actor)?
        }
    };

    crate::audit::record(
        &state.db.lock(),
        actor,
        "sync.triggered",
        provider,
        Some(&json!({ "jobId": job_id, "dataKind": data_kind, "syncKind": sync_kind.as_str() })),
    );
    Ok(job_id)
}

/// Live progress while the registry holds the job, the stored row after.
pub fn poll_sync_status(state: &AppState, job_id: &str) -> Result<SyncStatus, SyncError> {
    state.engine.poll_status(job_id)
}

/// Poll until the job is terminal, passing each new step to `on_step`.
///
/// The pipeline runs on the caller's runtime, so a caller that exits before
/// this returns leaves the job `running`.
pub async fn wait_for_sync(
    state: &AppState,
    job_id: &str,
    interval: Duration,
    mut on_step: impl FnMut(&str),
) -> Result<SyncStatus, SyncError> {
    let mut last_step = None;
    loop {
        let status = poll_sync_status(state, job_id)?;
        if status.current_step != last_step {
            if let Some(step) = &status.current_step {
                on_step(step);
            }
            last_step = status.current_step.clone();
        }
        if status.status.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(interval).await;
    }
}
