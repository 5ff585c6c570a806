//! Records imported from providers that hang off clients and staff members.
//!
//! Every upsert is keyed on the record's natural key, so re-running a sync
//! over the same provider data rewrites rows instead of duplicating them.

use chrono::Utc;
use rusqlite::params;

use super::{DbError, FinancialRecordUpsert, OpsDb, TimeEntryUpsert};

/// A deliverable tracked in a project tool.
#[derive(Debug, Clone)]
pub struct DeliverableUpsert<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub client_id: Option<&'a str>,
    pub title: &'a str,
    pub status: Option<&'a str>,
    pub due_date: Option<&'a str>,
}

/// An email, call or chat thread with a client.
#[derive(Debug, Clone)]
pub struct CommunicationUpsert<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub client_id: Option<&'a str>,
    pub channel: &'a str,
    pub subject: Option<&'a str>,
    pub occurred_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct MeetingUpsert<'a> {
    pub source: &'a str,
    pub external_id: &'a str,
    pub client_id: Option<&'a str>,
    pub title: &'a str,
    pub started_at: &'a str,
    pub duration_minutes: Option<i64>,
}

impl OpsDb {
    pub fn upsert_time_entry(&self, entry: &TimeEntryUpsert<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO time_entries (id, source, external_id, client_id, staff_id, spent_date,
                                       hours, billable, project, notes, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(source, external_id) DO UPDATE SET
                client_id = excluded.client_id,
                staff_id = excluded.staff_id,
                spent_date = excluded.spent_date,
                hours = excluded.hours,
                billable = excluded.billable,
                project = excluded.project,
                notes = excluded.notes,
                synced_at = excluded.synced_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                entry.source,
                entry.external_id,
                entry.client_id,
                entry.staff_id,
                entry.spent_date,
                entry.hours,
                entry.billable,
                entry.project,
                entry.notes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Upsert a monthly figure. The provider value replaces the stored one.
    pub fn upsert_financial_record(&self, record: &FinancialRecordUpsert<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO financial_records (id, client_id, month, record_type, category,
                                            amount, source, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(client_id, month, record_type, category) DO UPDATE SET
                amount = excluded.amount,
                source = excluded.source,
                synced_at = excluded.synced_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                record.client_id,
                record.month,
                record.record_type,
                record.category,
                record.amount,
                record.source,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_deliverable(&self, d: &DeliverableUpsert<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO deliverables (id, source, external_id, client_id, title, status, due_date, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source, external_id) DO UPDATE SET
                client_id = excluded.client_id,
                title = excluded.title,
                status = excluded.status,
                due_date = excluded.due_date,
                synced_at = excluded.synced_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                d.source,
                d.external_id,
                d.client_id,
                d.title,
                d.status,
                d.due_date,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_communication(&self, c: &CommunicationUpsert<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO communication_logs (id, source, external_id, client_id, channel, subject, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source, external_id) DO UPDATE SET
                client_id = excluded.client_id,
                channel = excluded.channel,
                subject = excluded.subject,
                occurred_at = excluded.occurred_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                c.source,
                c.external_id,
                c.client_id,
                c.channel,
                c.subject,
                c.occurred_at,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_meeting(&self, m: &MeetingUpsert<'_>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO meeting_logs (id, source, external_id, client_id, title, started_at, duration_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source, external_id) DO UPDATE SET
                client_id = excluded.client_id,
                title = excluded.title,
                started_at = excluded.started_at,
                duration_minutes = excluded.duration_minutes",
            params![
                uuid::Uuid::new_v4().to_string(),
                m.source,
                m.external_id,
                m.client_id,
                m.title,
                m.started_at,
                m.duration_minutes,
            ],
        )?;
        Ok(())
    }

    /// Link a staff member to a client. Re-linking updates the role.
    pub fn upsert_assignment(
        &self,
        client_id: &str,
        staff_id: &str,
        role: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO assignments (id, client_id, staff_id, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(client_id, staff_id) DO UPDATE SET role = COALESCE(excluded.role, role)",
            params![
                uuid::Uuid::new_v4().to_string(),
                client_id,
                staff_id,
                role,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Number of rows in `table` whose `column` points at `entity_id`.
    ///
    /// Only called with table and column names from
    /// [`crate::entity::EntityKind::dependents`].
    pub fn count_references(
        &self,
        table: &str,
        column: &str,
        entity_id: &str,
    ) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column);
        Ok(self.conn.query_row(&sql, params![entity_id], |row| row.get(0))?)
    }

    /// Stored amount for one financial key, if present.
    pub fn financial_amount(
        &self,
        client_id: &str,
        month: &str,
        record_type: &str,
        category: &str,
    ) -> Result<Option<f64>, DbError> {
        use rusqlite::OptionalExtension;
        Ok(self
            .conn
            .query_row(
                "SELECT amount FROM financial_records
                 WHERE client_id = ?1 AND month = ?2 AND record_type = ?3 AND category = ?4",
                params![client_id, month, record_type, category],
                |row| row.get(0),
            )
            .optional()?)
    }
}
