use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::client::{SheetsApi, SheetsSettings};
use crate::db::{DbError, FinancialRecordUpsert, OpsDb, SharedDb};
use crate::entity::EntityKind;
use crate::error::{ProviderError, SyncError};
use crate::integrations::IntegrationStore;
use crate::ratelimit::TokenBucket;
use crate::sync::oauth::{ensure_fresh_token, TokenRefresher};
use crate::sync::{BatchOutcome, Page, SyncAdapter, SyncContext};

pub const PROVIDER: &str = "sheets";

/// Rows fetched per range read.
pub const WINDOW_ROWS: u32 = 500;

/// Row 1 holds the headers.
const FIRST_DATA_ROW: u32 = 2;

const DEFAULT_CATEGORY: &str = "general";

/// One non-blank sheet row. Columns: client, month (`YYYY-MM`), record
/// type, category, amount. Column F is free text and ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub row_number: u32,
    pub cells: Vec<String>,
}

/// A parsed financial row, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
struct FinancialRow<'a> {
    client: &'a str,
    month: String,
    record_type: String,
    category: String,
    amount: f64,
}

/// Spreadsheet rows -> `financial_records`, keyed by (client, month, record
/// type, category). The sheet has no change tracking, so every run re-reads
/// it in full.
pub struct SheetsFinancialsAdapter {
    api: Arc<dyn SheetsApi>,
    refresher: Arc<dyn TokenRefresher>,
    store: IntegrationStore,
    limiter: Arc<TokenBucket>,
}

impl SheetsFinancialsAdapter {
    pub fn new(
        api: Arc<dyn SheetsApi>,
        refresher: Arc<dyn TokenRefresher>,
        store: IntegrationStore,
        limiter: Arc<TokenBucket>,
    ) -> Self {
        Self { api, refresher, store, limiter }
    }
}

#[async_trait]
impl SyncAdapter for SheetsFinancialsAdapter {
    type Record = SheetRow;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn data_kind(&self) -> &'static str {
        "financials"
    }

    async fn fetch_page(
        &self,
        _ctx: &SyncContext,
        cursor: Option<String>,
    ) -> Result<Page<SheetRow>, SyncError> {
        let start = match cursor {
            Some(c) => c.parse::<u32>().map_err(|_| {
                SyncError::provider(PROVIDER, ProviderError::Decode(format!("bad row cursor '{}'", c)))
            })?,
            None => FIRST_DATA_ROW,
        };
        let end = start + WINDOW_ROWS - 1;

        let settings: SheetsSettings =
            ensure_fresh_token(&self.store, PROVIDER, self.refresher.as_ref()).await?;
        let range = format!("{}!A{}:F{}", settings.sheet_name, start, end);

        self.limiter.acquire(1.0).await;
        let rows = self
            .api
            .read_range(&settings.tokens.access_token, &settings.spreadsheet_id, &range)
            .await
            .map_err(|e| SyncError::provider(PROVIDER, e))?;

        // A short window means the sheet ended inside it.
        let next_cursor = (rows.len() as u32 >= WINDOW_ROWS).then(|| (end + 1).to_string());
        let records = rows
            .into_iter()
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, cells)| SheetRow { row_number: start + i as u32, cells })
            .collect();

        Ok(Page { records, next_cursor })
    }

    async fn map_and_upsert(&self, batch: Vec<SheetRow>, _ctx: &SyncContext) -> BatchOutcome {
        upsert_batch(self.store.db(), &batch)
    }
}

fn upsert_batch(db: &SharedDb, batch: &[SheetRow]) -> BatchOutcome {
    let db = db.lock();
    let mut outcome = BatchOutcome::default();
    for row in batch {
        match parse_row(row).and_then(|parsed| upsert_row(&db, &parsed)) {
            Ok(()) => outcome.record_success(),
            Err(e) => outcome.record_failure(format!("row {}: {}", row.row_number, e)),
        }
    }
    outcome
}

fn cell(row: &SheetRow, idx: usize) -> &str {
    row.cells.get(idx).map(|c| c.trim()).unwrap_or("")
}

fn parse_row(row: &SheetRow) -> Result<FinancialRow<'_>, String> {
    let client = cell(row, 0);
    if client.is_empty() {
        return Err("missing client name".to_string());
    }

    let month = cell(row, 1);
    NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .map_err(|_| format!("invalid month '{}', expected YYYY-MM", month))?;

    let record_type = cell(row, 2).to_lowercase();
    if record_type.is_empty() {
        return Err("missing record type".to_string());
    }

    let category = match cell(row, 3) {
        "" => DEFAULT_CATEGORY.to_string(),
        c => c.to_lowercase(),
    };

    let raw_amount = cell(row, 4);
    let amount = parse_amount(raw_amount).ok_or_else(|| format!("invalid amount '{}'", raw_amount))?;

    Ok(FinancialRow {
        client,
        month: month.to_string(),
        record_type,
        category,
        amount,
    })
}

/// Accepts spreadsheet-formatted money: `$1,234.50`, `-20`, `(75.00)`.
fn parse_amount(raw: &str) -> Option<f64> {
    let (negative, inner) = match raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, raw),
    };
    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn upsert_row(db: &OpsDb, row: &FinancialRow<'_>) -> Result<(), String> {
    db.with_transaction(|tx| {
        let client_id =
            tx.resolve_or_create_entity(EntityKind::Client, PROVIDER, None, row.client, None)?;
        tx.upsert_financial_record(&FinancialRecordUpsert {
            client_id: &client_id,
            month: &row.month,
            record_type: &row.record_type,
            category: &row.category,
            amount: row.amount,
            source: PROVIDER,
        })?;
        Ok::<(), DbError>(())
    })
    .map_err(|e| e.to_string())
}
