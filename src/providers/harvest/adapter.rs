use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::client::{HarvestApi, HarvestSettings, HarvestTimeEntry, HarvestUser};
use crate::db::{DbError, OpsDb, SharedDb, StaffProfile, TimeEntryUpsert};
use crate::entity::EntityKind;
use crate::error::{ProviderError, SyncError};
use crate::integrations::IntegrationStore;
use crate::ratelimit::TokenBucket;
use crate::sync::{BatchOutcome, Page, SyncAdapter, SyncContext};

pub const PROVIDER: &str = "harvest";

/// Harvest pages are numbered from 1; the cursor carries the next number.
fn page_number(cursor: Option<String>) -> Result<u32, SyncError> {
    match cursor {
        Some(c) => c.parse::<u32>().map_err(|_| {
            SyncError::provider(PROVIDER, ProviderError::Decode(format!("bad page cursor '{}'", c)))
        }),
        None => Ok(1),
    }
}

/// Harvest time entries -> `time_entries`, keyed by Harvest entry id.
pub struct HarvestTimeEntriesAdapter {
    api: Arc<dyn HarvestApi>,
    store: IntegrationStore,
    limiter: Arc<TokenBucket>,
}

impl HarvestTimeEntriesAdapter {
    pub fn new(api: Arc<dyn HarvestApi>, store: IntegrationStore, limiter: Arc<TokenBucket>) -> Self {
        Self { api, store, limiter }
    }
}

#[async_trait]
impl SyncAdapter for HarvestTimeEntriesAdapter {
    type Record = HarvestTimeEntry;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn data_kind(&self) -> &'static str {
        "time_entries"
    }

    async fn fetch_page(
        &self,
        ctx: &SyncContext,
        cursor: Option<String>,
    ) -> Result<Page<HarvestTimeEntry>, SyncError> {
        let page = page_number(cursor)?;
        let settings: HarvestSettings = self.store.load_settings(PROVIDER)?;

        self.limiter.acquire(1.0).await;
        let response = self
            .api
            .time_entries(&settings, page, ctx.since)
            .await
            .map_err(|e| SyncError::provider(PROVIDER, e))?;

        Ok(Page {
            records: response.time_entries,
            next_cursor: response.next_page.map(|p| p.to_string()),
        })
    }

    async fn map_and_upsert(&self, batch: Vec<HarvestTimeEntry>, _ctx: &SyncContext) -> BatchOutcome {
        upsert_batch(self.store.db(), &batch)
    }
}

/// Harvest users -> `staff`, bound by Harvest user id. Fills the staff
/// email that time entries never carry.
pub struct HarvestUsersAdapter {
    api: Arc<dyn HarvestApi>,
    store: IntegrationStore,
    limiter: Arc<TokenBucket>,
}

impl HarvestUsersAdapter {
    pub fn new(api: Arc<dyn HarvestApi>, store: IntegrationStore, limiter: Arc<TokenBucket>) -> Self {
        Self { api, store, limiter }
    }
}

#[async_trait]
impl SyncAdapter for HarvestUsersAdapter {
    type Record = HarvestUser;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn data_kind(&self) -> &'static str {
        "users"
    }

    async fn fetch_page(
        &self,
        ctx: &SyncContext,
        cursor: Option<String>,
    ) -> Result<Page<HarvestUser>, SyncError> {
        let page = page_number(cursor)?;
        let settings: HarvestSettings = self.store.load_settings(PROVIDER)?;

        self.limiter.acquire(1.0).await;
        let response = self
            .api
            .users(&settings, page, ctx.since)
            .await
            .map_err(|e| SyncError::provider(PROVIDER, e))?;

        Ok(Page {
            records: response.users,
            next_cursor: response.next_page.map(|p| p.to_string()),
        })
    }

    async fn map_and_upsert(&self, batch: Vec<HarvestUser>, _ctx: &SyncContext) -> BatchOutcome {
        let db = self.store.db().lock();
        let mut outcome = BatchOutcome::default();
        for user in &batch {
            match upsert_user(&db, user) {
                Ok(()) => outcome.record_success(),
                Err(e) => outcome.record_failure(format!("user {}: {}", user.id, e)),
            }
        }
        outcome
    }
}

fn upsert_user(db: &OpsDb, user: &HarvestUser) -> Result<(), String> {
    let name = user.full_name();
    if name.is_empty() {
        return Err("missing name".to_string());
    }
    let email = user.email.as_deref().map(str::trim).filter(|e| !e.is_empty());

    db.with_transaction(|tx| {
        let staff_id = tx.resolve_or_create_entity(
            EntityKind::Staff,
            PROVIDER,
            Some(&user.id.to_string()),
            &name,
            email,
        )?;
        tx.update_staff_profile(
            &staff_id,
            &name,
            &StaffProfile {
                email,
                role: user.roles.first().map(String::as_str),
                hourly_rate: user.default_hourly_rate,
            },
        )?;
        Ok::<(), DbError>(())
    })
    .map_err(|e| e.to_string())
}

fn upsert_batch(db: &SharedDb, batch: &[HarvestTimeEntry]) -> BatchOutcome {
    let db = db.lock();
    let mut outcome = BatchOutcome::default();
    for entry in batch {
        match upsert_entry(&db, entry) {
            Ok(()) => outcome.record_success(),
            Err(e) => outcome.record_failure(format!("time entry {}: {}", entry.id, e)),
        }
    }
    outcome
}

fn upsert_entry(db: &OpsDb, entry: &HarvestTimeEntry) -> Result<(), String> {
    NaiveDate::parse_from_str(&entry.spent_date, "%Y-%m-%d")
        .map_err(|_| format!("invalid spent_date '{}'", entry.spent_date))?;
    if !entry.hours.is_finite() || entry.hours < 0.0 {
        return Err(format!("invalid hours {}", entry.hours));
    }
    let external_id = entry.id.to_string();

    db.with_transaction(|tx| {
        let client_id = match &entry.client {
            Some(c) => Some(tx.resolve_or_create_entity(
                EntityKind::Client,
                PROVIDER,
                Some(&c.id.to_string()),
                &c.name,
                None,
            )?),
            None => None,
        };
        let staff_id = match &entry.user {
            Some(u) => Some(tx.resolve_or_create_entity(
                EntityKind::Staff,
                PROVIDER,
                Some(&u.id.to_string()),
                &u.name,
                None,
            )?),
            None => None,
        };

        tx.upsert_time_entry(&TimeEntryUpsert {
            source: PROVIDER,
            external_id: &external_id,
            client_id: client_id.as_deref(),
            staff_id: staff_id.as_deref(),
            spent_date: &entry.spent_date,
            hours: entry.hours,
            billable: entry.billable,
            project: entry.project.as_ref().map(|p| p.name.as_str()),
            notes: entry.notes.as_deref(),
        })?;

        if let (Some(client), Some(staff)) = (&client_id, &staff_id) {
            tx.upsert_assignment(client, staff, None)?;
        }
        Ok::<(), DbError>(())
    })
    .map_err(|e| e.to_string())
}
