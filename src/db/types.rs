//! Row types and the store error.

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Corrupt JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

/// A row from the `sync_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSyncJob {
    pub id: String,
    pub provider: String,
    pub data_kind: String,
    pub sync_kind: String,
    pub status: String,
    pub records_found: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub errors: Vec<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub triggered_by: String,
}

/// Values needed to open a `running` job row.
#[derive(Debug, Clone)]
pub struct NewSyncJob<'a> {
    pub id: &'a str,
    pub provider: &'a str,
    pub data_kind: &'a str,
    pub sync_kind: &'a str,
    pub triggered_by: &'a str,
    /// RFC 3339. Lower bound for the next incremental run if this one
    /// completes.
    pub started_at: &'a str,
}

/// Final counters written when a job leaves `running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub found: u64,
    pub synced: u64,
    pub failed: u64,
}

/// A row from the `integrations` table. `settings` is the sealed blob and is
/// never serialized outward.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIntegration {
    pub provider: String,
    pub enabled: bool,
    #[serde(skip)]
    pub settings: Option<Vec<u8>>,
    pub last_sync_at: Option<String>,
    pub last_sync_status: Option<String>,
    pub updated_at: String,
}

/// A client or staff member row, with the kind-specific scalar fields folded
/// into `details`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbBusinessEntity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub source: String,
    pub email: Option<String>,
    pub details: EntityDetails,
    pub updated_at: String,
}

/// Scalar fields that a merge backfills onto the kept entity when empty.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntityDetails {
    Client {
        phone: Option<String>,
        website: Option<String>,
        industry: Option<String>,
        notes: Option<String>,
    },
    Staff {
        role: Option<String>,
        hourly_rate: Option<f64>,
        notes: Option<String>,
    },
}

/// An alternate name bound to a canonical entity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlias {
    pub alias: String,
    pub source: String,
    pub entity_id: String,
}

/// Rows moved by an entity merge, per dependent table.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub time_entries_moved: usize,
    pub deliverables_moved: usize,
    pub financial_records_moved: usize,
    pub financial_records_combined: usize,
    pub communication_logs_moved: usize,
    pub meeting_logs_moved: usize,
    pub assignments_moved: usize,
    pub aliases_moved: usize,
    pub external_ids_moved: usize,
    pub fields_backfilled: Vec<String>,
}

/// A time entry as written by time-tracking adapters.
#[derive(Debug, Clone)]
pub struct TimeEntryUpsert<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub client_id: Option<&'a str>,
    pub staff_id: Option<&'a str>,
    pub spent_date: &'a str,
    pub hours: f64,
    pub billable: bool,
    pub project: Option<&'a str>,
    pub notes: Option<&'a str>,
}

/// A monthly financial figure keyed by (client, month, record type, category).
#[derive(Debug, Clone)]
pub struct FinancialRecordUpsert<'a> {
    pub client_id: &'a str,
    pub month: &'a str,
    pub record_type: &'a str,
    pub category: &'a str,
    pub amount: f64,
    pub source: &'a str,
}

/// Client fields a CRM adapter is allowed to refresh.
#[derive(Debug, Clone, Default)]
pub struct ClientProfile<'a> {
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub website: Option<&'a str>,
    pub industry: Option<&'a str>,
}

/// Staff fields a time-tracking adapter is allowed to refresh.
#[derive(Debug, Clone, Default)]
pub struct StaffProfile<'a> {
    pub email: Option<&'a str>,
    pub role: Option<&'a str>,
    pub hourly_rate: Option<f64>,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAuditEntry {
    pub id: i64,
    pub occurred_at: String,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub detail: Option<String>,
}
