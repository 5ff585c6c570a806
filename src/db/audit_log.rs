//! Append-only record of operator actions and sync outcomes.

use chrono::Utc;
use rusqlite::params;

use super::{DbAuditEntry, DbError, OpsDb};

impl OpsDb {
    pub fn insert_audit_entry(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        detail: Option<&str>,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO audit_log (occurred_at, actor, action, target, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Utc::now().to_rfc3339(), actor, action, target, detail],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest entries first.
    pub fn list_audit_entries(&self, limit: usize) -> Result<Vec<DbAuditEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, actor, action, target, detail
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DbAuditEntry {
                id: row.get(0)?,
                occurred_at: row.get(1)?,
                actor: row.get(2)?,
                action: row.get(3)?,
                target: row.get(4)?,
                detail: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
