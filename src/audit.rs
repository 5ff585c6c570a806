//! Audit trail for operator actions and sync outcomes.
//!
//! Recording is best-effort: a failed audit write is logged and never fails
//! the operation it describes.

use crate::db::OpsDb;

/// How many entries the CLI shows by default.
pub const DEFAULT_AUDIT_LIMIT: usize = 50;

/// Record one audit entry, swallowing store errors.
pub fn record(
    db: &OpsDb,
    actor: &str,
    action: &str,
    target: &str,
    detail: Option<&serde_json::Value>,
) {
    let detail = detail.map(|d| d.to_string());
    if let Err(e) = db.insert_audit_entry(actor, action, target, detail.as_deref()) {
        log::warn!("Audit write failed for {} on {}: {}", action, target, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[test]
    fn test_record_writes_entry() {
        let db = test_db();
        record(&db, "ops", "entity.merge", "client:a", Some(&serde_json::json!({"mergeId": "b"})));
        let entries = db.list_audit_entries(DEFAULT_AUDIT_LIMIT).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].detail.as_deref().unwrap().contains("mergeId"));
    }

    #[test]
    fn test_record_swallows_store_errors() {
        let db = test_db();
        db.conn_ref().execute_batch("DROP TABLE audit_log").unwrap();
        // Must not panic or propagate.
        record(&db, "ops", "entity.reject", "client:a|b", None);
    }
}
