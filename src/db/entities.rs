//! Clients, staff members, their aliases and provider external ids.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{
    ClientProfile, DbAlias, DbBusinessEntity, DbError, EntityDetails, MergeReport, OpsDb,
    StaffProfile,
};
use crate::entity::EntityKind;

const CLIENT_COLUMNS: &str = "id, name, source, email, phone, website, industry, notes, updated_at";
const STAFF_COLUMNS: &str = "id, name, source, email, role, hourly_rate, notes, updated_at";

fn columns_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Client => CLIENT_COLUMNS,
        EntityKind::Staff => STAFF_COLUMNS,
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

impl OpsDb {
    pub fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<DbBusinessEntity>, DbError> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", columns_for(kind), kind.table());
        Ok(self
            .conn
            .query_row(&sql, params![id], |row| map_entity_row(kind, row))
            .optional()?)
    }

    /// All entities of a kind, ordered by name.
    pub fn list_entities(&self, kind: EntityKind) -> Result<Vec<DbBusinessEntity>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY name COLLATE NOCASE, id",
            columns_for(kind),
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| map_entity_row(kind, row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Insert a new entity and return its id.
    pub fn insert_entity(
        &self,
        kind: EntityKind,
        name: &str,
        source: &str,
        email: Option<&str>,
    ) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (id, name, source, email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            kind.table()
        );
        self.conn
            .execute(&sql, params![id, name.trim(), source, email, now])?;
        Ok(id)
    }

    pub fn find_entity_by_external_id(
        &self,
        kind: EntityKind,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT entity_id FROM entity_external_ids
                 WHERE entity_kind = ?1 AND provider = ?2 AND external_id = ?3",
                params![kind.as_str(), provider, external_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Bind a provider id to an entity. Rebinding an id moves it.
    pub fn bind_external_id(
        &self,
        kind: EntityKind,
        entity_id: &str,
        provider: &str,
        external_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO entity_external_ids (entity_kind, entity_id, provider, external_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_kind, provider, external_id)
             DO UPDATE SET entity_id = excluded.entity_id",
            params![kind.as_str(), entity_id, provider, external_id],
        )?;
        Ok(())
    }

    pub fn list_external_ids(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<(String, String)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT provider, external_id FROM entity_external_ids
             WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY provider, external_id",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), entity_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_entity_by_alias(
        &self,
        kind: EntityKind,
        alias: &str,
        source: &str,
    ) -> Result<Option<String>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE alias = ?1 COLLATE NOCASE AND source = ?2",
            kind.fk_column(),
            kind.alias_table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![alias.trim(), source], |row| row.get(0))
            .optional()?)
    }

    /// Case-insensitive exact name lookup within one source.
    pub fn find_entity_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        source: &str,
    ) -> Result<Option<String>, DbError> {
        let sql = format!(
            "SELECT id FROM {} WHERE name = ?1 COLLATE NOCASE AND source = ?2
             ORDER BY created_at LIMIT 1",
            kind.table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![name.trim(), source], |row| row.get(0))
            .optional()?)
    }

    /// Bind (alias, source) to an entity. An (alias, source) pair maps to at
    /// most one entity, so an existing binding is moved.
    pub fn upsert_alias(
        &self,
        kind: EntityKind,
        alias: &str,
        source: &str,
        entity_id: &str,
    ) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO {table} (alias, source, {fk}, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(alias, source) DO UPDATE SET {fk} = excluded.{fk}",
            table = kind.alias_table(),
            fk = kind.fk_column()
        );
        self.conn.execute(
            &sql,
            params![alias.trim(), source, entity_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_aliases(&self, kind: EntityKind, entity_id: &str) -> Result<Vec<DbAlias>, DbError> {
        let sql = format!(
            "SELECT alias, source, {fk} FROM {table} WHERE {fk} = ?1 ORDER BY source, alias",
            table = kind.alias_table(),
            fk = kind.fk_column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(DbAlias {
                alias: row.get(0)?,
                source: row.get(1)?,
                entity_id: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Find the canonical entity for a provider record, creating one if none
    /// matches.
    ///
    /// Lookup order: provider external id, alias under this source, exact
    /// name under this source. A newly created or name-matched entity gets the
    /// external id bound so later runs hit the first branch.
    pub fn resolve_or_create_entity(
        &self,
        kind: EntityKind,
        source: &str,
        external_id: Option<&str>,
        name: &str,
        email: Option<&str>,
    ) -> Result<String, DbError> {
        if let Some(ext) = external_id {
            if let Some(id) = self.find_entity_by_external_id(kind, source, ext)? {
                return Ok(id);
            }
        }

        let existing = match self.find_entity_by_alias(kind, name, source)? {
            Some(id) => Some(id),
            None => self.find_entity_by_name(kind, name, source)?,
        };

        let id = match existing {
            Some(id) => id,
            None => self.insert_entity(kind, name, source, email)?,
        };

        if let Some(ext) = external_id {
            self.bind_external_id(kind, &id, source, ext)?;
        }
        Ok(id)
    }

    /// Refresh CRM-owned client fields. Absent values leave the column alone.
    pub fn update_client_profile(
        &self,
        client_id: &str,
        name: &str,
        profile: &ClientProfile<'_>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE clients
             SET name = ?2,
                 email = COALESCE(?3, email),
                 phone = COALESCE(?4, phone),
                 website = COALESCE(?5, website),
                 industry = COALESCE(?6, industry),
                 updated_at = ?7
             WHERE id = ?1",
            params![
                client_id,
                name.trim(),
                profile.email,
                profile.phone,
                profile.website,
                profile.industry,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Refresh staff fields from the time tracker. An email already on file
    /// is kept; absent values leave their column alone.
    pub fn update_staff_profile(
        &self,
        staff_id: &str,
        name: &str,
        profile: &StaffProfile<'_>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE staff
             SET name = ?2,
                 email = COALESCE(NULLIF(TRIM(email), ''), ?3),
                 role = COALESCE(?4, role),
                 hourly_rate = COALESCE(?5, hourly_rate),
                 updated_at = ?6
             WHERE id = ?1",
            params![
                staff_id,
                name.trim(),
                profile.email.map(str::trim).filter(|e| !e.is_empty()),
                profile.role,
                profile.hourly_rate,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fold `merged` into `keep` inside one transaction.
    ///
    /// 1. alias (merged name, merged source) -> keep
    /// 2. every dependent foreign key, alias and external id -> keep
    /// 3. empty scalar fields on keep backfilled from merged
    /// 4. merged row deleted
    ///
    /// Any failure rolls the whole merge back; foreign keys are enforced, so
    /// a dependent table missed in step 2 makes step 4 fail rather than leave
    /// a dangling reference.
    pub fn merge_entities(
        &self,
        kind: EntityKind,
        keep: &DbBusinessEntity,
        merged: &DbBusinessEntity,
    ) -> Result<MergeReport, DbError> {
        self.with_transaction(|tx| {
            let conn = tx.conn_ref();
            let keep_id = keep.id.as_str();
            let merge_id = merged.id.as_str();
            let mut report = MergeReport::default();

            // 1. Future lookups under the old name land on the kept entity.
            tx.upsert_alias(kind, &merged.name, &merged.source, keep_id)?;

            // 2. Dependent records.
            for dep in kind.dependents() {
                let moved = if dep.table == "financial_records" {
                    report.financial_records_combined =
                        combine_financial_collisions(conn, keep_id, merge_id)?;
                    conn.execute(
                        "UPDATE financial_records SET client_id = ?1 WHERE client_id = ?2",
                        params![keep_id, merge_id],
                    )?
                } else if dep.unique_with_fk {
                    let moved = conn.execute(
                        &format!(
                            "UPDATE OR IGNORE {t} SET {c} = ?1 WHERE {c} = ?2",
                            t = dep.table,
                            c = dep.column
                        ),
                        params![keep_id, merge_id],
                    )?;
                    // Rows the kept entity already had are duplicates now.
                    conn.execute(
                        &format!("DELETE FROM {} WHERE {} = ?1", dep.table, dep.column),
                        params![merge_id],
                    )?;
                    moved
                } else {
                    conn.execute(
                        &format!(
                            "UPDATE {t} SET {c} = ?1 WHERE {c} = ?2",
                            t = dep.table,
                            c = dep.column
                        ),
                        params![keep_id, merge_id],
                    )?
                };

                match dep.table {
                    "time_entries" => report.time_entries_moved = moved,
                    "deliverables" => report.deliverables_moved = moved,
                    "financial_records" => report.financial_records_moved = moved,
                    "communication_logs" => report.communication_logs_moved = moved,
                    "meeting_logs" => report.meeting_logs_moved = moved,
                    "assignments" => report.assignments_moved = moved,
                    _ => {}
                }
            }

            report.aliases_moved = conn.execute(
                &format!(
                    "UPDATE {t} SET {c} = ?1 WHERE {c} = ?2",
                    t = kind.alias_table(),
                    c = kind.fk_column()
                ),
                params![keep_id, merge_id],
            )?;

            report.external_ids_moved = conn.execute(
                "UPDATE entity_external_ids SET entity_id = ?1
                 WHERE entity_kind = ?3 AND entity_id = ?2",
                params![keep_id, merge_id, kind.as_str()],
            )?;

            // 3. Backfill only what the kept entity lacks.
            report.fields_backfilled = backfill_fields(conn, kind, keep, merged)?;

            // Rejections that mention the merged id can never match again.
            conn.execute(
                "DELETE FROM match_rejections
                 WHERE entity_kind = ?1 AND (pair_key LIKE ?2 || '|%' OR pair_key LIKE '%|' || ?2)",
                params![kind.as_str(), merge_id],
            )?;

            // 4. Remove the merged entity.
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                params![merge_id],
            )?;

            Ok(report)
        })
    }

    pub fn insert_match_rejection(
        &self,
        kind: EntityKind,
        pair_key: &str,
        rejected_by: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO match_rejections (entity_kind, pair_key, rejected_by, rejected_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_kind, pair_key) DO UPDATE SET rejected_by = excluded.rejected_by,
                                                             rejected_at = excluded.rejected_at",
            params![kind.as_str(), pair_key, rejected_by, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_rejected_pairs(&self, kind: EntityKind) -> Result<HashSet<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT pair_key FROM match_rejections WHERE entity_kind = ?1")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }
}

fn map_entity_row(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<DbBusinessEntity> {
    let details = match kind {
        EntityKind::Client => EntityDetails::Client {
            phone: row.get(4)?,
            website: row.get(5)?,
            industry: row.get(6)?,
            notes: row.get(7)?,
        },
        EntityKind::Staff => EntityDetails::Staff {
            role: row.get(4)?,
            hourly_rate: row.get(5)?,
            notes: row.get(6)?,
        },
    };
    let updated_at_idx = match kind {
        EntityKind::Client => 8,
        EntityKind::Staff => 7,
    };
    Ok(DbBusinessEntity {
        id: row.get(0)?,
        kind,
        name: row.get(1)?,
        source: row.get(2)?,
        email: row.get(3)?,
        details,
        updated_at: row.get(updated_at_idx)?,
    })
}

/// Sum merged financial rows into kept rows that share (month, type,
/// category), then drop the merged duplicates. Returns the number combined.
fn combine_financial_collisions(
    conn: &rusqlite::Connection,
    keep_id: &str,
    merge_id: &str,
) -> Result<usize, DbError> {
    let combined = conn.execute(
        "UPDATE financial_records
         SET amount = amount + (
                 SELECT m.amount FROM financial_records m
                 WHERE m.client_id = ?2
                   AND m.month = financial_records.month
                   AND m.record_type = financial_records.record_type
                   AND m.category = financial_records.category),
             synced_at = ?3
         WHERE client_id = ?1
           AND EXISTS (
                 SELECT 1 FROM financial_records m
                 WHERE m.client_id = ?2
                   AND m.month = financial_records.month
                   AND m.record_type = financial_records.record_type
                   AND m.category = financial_records.category)",
        params![keep_id, merge_id, Utc::now().to_rfc3339()],
    )?;
    conn.execute(
        "DELETE FROM financial_records
         WHERE client_id = ?2
           AND EXISTS (
                 SELECT 1 FROM financial_records k
                 WHERE k.client_id = ?1
                   AND k.month = financial_records.month
                   AND k.record_type = financial_records.record_type
                   AND k.category = financial_records.category)",
        params![keep_id, merge_id],
    )?;
    Ok(combined)
}

fn backfill_fields(
    conn: &rusqlite::Connection,
    kind: EntityKind,
    keep: &DbBusinessEntity,
    merged: &DbBusinessEntity,
) -> Result<Vec<String>, DbError> {
    let mut text_fields: Vec<(&'static str, &Option<String>, &Option<String>)> =
        vec![("email", &keep.email, &merged.email)];

    match (&keep.details, &merged.details) {
        (
            EntityDetails::Client { phone: kp, website: kw, industry: ki, notes: kn },
            EntityDetails::Client { phone: mp, website: mw, industry: mi, notes: mn },
        ) => {
            text_fields.push(("phone", kp, mp));
            text_fields.push(("website", kw, mw));
            text_fields.push(("industry", ki, mi));
            text_fields.push(("notes", kn, mn));
        }
        (
            EntityDetails::Staff { role: kr, notes: kn, .. },
            EntityDetails::Staff { role: mr, notes: mn, .. },
        ) => {
            text_fields.push(("role", kr, mr));
            text_fields.push(("notes", kn, mn));
        }
        _ => {}
    }

    let now = Utc::now().to_rfc3339();
    let mut backfilled = Vec::new();
    for (column, kept, incoming) in text_fields {
        if !is_blank(kept) || is_blank(incoming) {
            continue;
        }
        conn.execute(
            &format!(
                "UPDATE {} SET {col} = ?2, updated_at = ?3
                 WHERE id = ?1 AND ({col} IS NULL OR TRIM({col}) = '')",
                kind.table(),
                col = column
            ),
            params![keep.id, incoming, now],
        )?;
        backfilled.push(column.to_string());
    }

    if let (
        EntityDetails::Staff { hourly_rate: None, .. },
        EntityDetails::Staff { hourly_rate: Some(rate), .. },
    ) = (&keep.details, &merged.details)
    {
        conn.execute(
            "UPDATE staff SET hourly_rate = ?2, updated_at = ?3
             WHERE id = ?1 AND hourly_rate IS NULL",
            params![keep.id, rate, now],
        )?;
        backfilled.push("hourly_rate".to_string());
    }

    Ok(backfilled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[test]
    fn test_resolve_prefers_external_id_then_alias() {
        let db = test_db();
        let id = db
            .resolve_or_create_entity(EntityKind::Client, "harvest", Some("42"), "Acme", None)
            .unwrap();

        // Renamed upstream: external id still wins.
        let again = db
            .resolve_or_create_entity(EntityKind::Client, "harvest", Some("42"), "Acme Corp", None)
            .unwrap();
        assert_eq!(id, again);

        let other = db.insert_entity(EntityKind::Client, "Globex", "hubspot", None).unwrap();
        db.upsert_alias(EntityKind::Client, "Globex Intl", "harvest", &other).unwrap();
        let via_alias = db
            .resolve_or_create_entity(EntityKind::Client, "harvest", Some("77"), "globex intl", None)
            .unwrap();
        assert_eq!(via_alias, other);
        assert_eq!(
            db.find_entity_by_external_id(EntityKind::Client, "harvest", "77").unwrap(),
            Some(other)
        );
    }

    #[test]
    fn test_alias_pair_maps_to_one_entity() {
        let db = test_db();
        let a = db.insert_entity(EntityKind::Staff, "Jane Doe", "harvest", None).unwrap();
        let b = db.insert_entity(EntityKind::Staff, "J. Doe", "slack", None).unwrap();

        db.upsert_alias(EntityKind::Staff, "jdoe", "slack", &a).unwrap();
        db.upsert_alias(EntityKind::Staff, "jdoe", "slack", &b).unwrap();

        assert_eq!(
            db.find_entity_by_alias(EntityKind::Staff, "jdoe", "slack").unwrap(),
            Some(b.clone())
        );
        assert!(db.list_aliases(EntityKind::Staff, &a).unwrap().is_empty());
    }

    #[test]
    fn test_alias_case_variants_share_one_binding() {
        let db = test_db();
        let a = db.insert_entity(EntityKind::Client, "Acme", "harvest", None).unwrap();
        let b = db.insert_entity(EntityKind::Client, "Acme Corp", "harvest", None).unwrap();

        db.upsert_alias(EntityKind::Client, "ACME", "harvest", &a).unwrap();
        db.upsert_alias(EntityKind::Client, "acme", "harvest", &b).unwrap();

        assert!(db.list_aliases(EntityKind::Client, &a).unwrap().is_empty());
        let bound = db.list_aliases(EntityKind::Client, &b).unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].alias, "ACME");
        assert_eq!(
            db.find_entity_by_alias(EntityKind::Client, "Acme", "harvest").unwrap(),
            Some(b)
        );
    }

    #[test]
    fn test_update_client_profile_keeps_absent_fields() {
        let db = test_db();
        let id = db.insert_entity(EntityKind::Client, "Acme", "hubspot", None).unwrap();
        db.update_client_profile(
            &id,
            "Acme",
            &ClientProfile { phone: Some("555-0100"), ..Default::default() },
        )
        .unwrap();
        db.update_client_profile(
            &id,
            "Acme Inc",
            &ClientProfile { website: Some("acme.test"), ..Default::default() },
        )
        .unwrap();

        let client = db.get_entity(EntityKind::Client, &id).unwrap().unwrap();
        assert_eq!(client.name, "Acme Inc");
        match client.details {
            EntityDetails::Client { phone, website, .. } => {
                assert_eq!(phone.as_deref(), Some("555-0100"));
                assert_eq!(website.as_deref(), Some("acme.test"));
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_update_staff_profile_fills_blank_email_only() {
        let db = test_db();
        let id = db.insert_entity(EntityKind::Staff, "Jane Doe", "harvest", None).unwrap();
        db.update_staff_profile(
            &id,
            "Jane Doe",
            &StaffProfile { email: Some("jane@acme.test"), hourly_rate: Some(150.0), ..Default::default() },
        )
        .unwrap();
        db.update_staff_profile(
            &id,
            "Jane Doe",
            &StaffProfile { email: Some("other@acme.test"), role: Some("Designer"), ..Default::default() },
        )
        .unwrap();

        let staff = db.get_entity(EntityKind::Staff, &id).unwrap().unwrap();
        assert_eq!(staff.email.as_deref(), Some("jane@acme.test"));
        match staff.details {
            EntityDetails::Staff { role, hourly_rate, .. } => {
                assert_eq!(role.as_deref(), Some("Designer"));
                assert_eq!(hourly_rate, Some(150.0));
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_rejections_round_trip() {
        let db = test_db();
        db.insert_match_rejection(EntityKind::Client, "a|b", "ops").unwrap();
        db.insert_match_rejection(EntityKind::Client, "a|b", "ops2").unwrap();
        let pairs = db.list_rejected_pairs(EntityKind::Client).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains("a|b"));
        assert!(db.list_rejected_pairs(EntityKind::Staff).unwrap().is_empty());
    }
}
