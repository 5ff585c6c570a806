//! Duplicate detection and merging for clients and staff members.
//!
//! [`find_matches`] compares every cross-source pair of one entity kind and
//! ranks the likely duplicates. It is O(n^2) over the whole population on
//! purpose: agency rosters are tens to low hundreds of rows, and the ranking
//! semantics (threshold, ordering) are part of the contract.
//!
//! [`merge`] folds one entity into another inside a single transaction.

use std::collections::HashSet;

use serde::Serialize;

use crate::db::{DbBusinessEntity, DbError, MergeReport, OpsDb};
use crate::entity::EntityKind;
use crate::matcher;

/// Minimum name similarity for a pair to be suggested.
pub const MATCH_THRESHOLD: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Database: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    /// Same email address on both staff records.
    Email,
    /// Normalized display names are similar.
    Name,
}

/// One side of a suggested pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub id: String,
    pub name: String,
    pub source: String,
}

impl From<&DbBusinessEntity> for MatchCandidate {
    fn from(e: &DbBusinessEntity) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            source: e.source.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSuggestion {
    pub pair_key: String,
    pub entity_kind: EntityKind,
    pub a: MatchCandidate,
    pub b: MatchCandidate,
    /// 0 to 100.
    pub confidence: u8,
    pub status: SuggestionStatus,
    pub reason: MatchReason,
}

/// Order-independent key for an entity pair.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

fn same_email(a: &DbBusinessEntity, b: &DbBusinessEntity) -> bool {
    match (a.email.as_deref().map(str::trim), b.email.as_deref().map(str::trim)) {
        (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => x.to_lowercase() == y.to_lowercase(),
        _ => false,
    }
}

/// Ranked duplicate suggestions for one entity kind.
///
/// Pairs from the same source are never suggested, each unordered pair
/// appears at most once, and pairs an operator rejected are skipped. Staff
/// sharing an email address are suggested at confidence 100 and already
/// confirmed. Results are sorted by descending confidence, then pair key.
pub fn find_matches(db: &OpsDb, kind: EntityKind) -> Result<Vec<MatchSuggestion>, ResolverError> {
    let entities = db.list_entities(kind)?;
    let rejected = db.list_rejected_pairs(kind)?;
    let style = kind.name_style();
    let normalized: Vec<String> = entities
        .iter()
        .map(|e| matcher::normalize(&e.name, style))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut suggestions = Vec::new();

    for (i, a) in entities.iter().enumerate() {
        for (j, b) in entities.iter().enumerate().skip(i + 1) {
            if a.source == b.source || a.id == b.id {
                continue;
            }
            let key = pair_key(&a.id, &b.id);
            if rejected.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }

            let (confidence, status, reason) = if kind == EntityKind::Staff && same_email(a, b) {
                (100u8, SuggestionStatus::Confirmed, MatchReason::Email)
            } else {
                if normalized[i].is_empty() || normalized[j].is_empty() {
                    continue;
                }
                let score = matcher::score_normalized(&normalized[i], &normalized[j]);
                if score < MATCH_THRESHOLD {
                    continue;
                }
                let confidence = (score * 100.0).round().clamp(0.0, 100.0) as u8;
                (confidence, SuggestionStatus::Pending, MatchReason::Name)
            };

            suggestions.push(MatchSuggestion {
                pair_key: key,
                entity_kind: kind,
                a: a.into(),
                b: b.into(),
                confidence,
                status,
                reason,
            });
        }
    }

    suggestions.sort_by(|x, y| {
        y.confidence
            .cmp(&x.confidence)
            .then_with(|| x.pair_key.cmp(&y.pair_key))
    });
    Ok(suggestions)
}

/// Fold `merge_id` into `keep_id`.
///
/// After success the merged id is gone, every record that pointed at it
/// points at the kept entity, and the merged entity's name and source
/// resolve to the kept entity through an alias. On any error nothing is
/// changed.
pub fn merge(
    db: &OpsDb,
    kind: EntityKind,
    keep_id: &str,
    merge_id: &str,
) -> Result<MergeReport, ResolverError> {
    if keep_id == merge_id {
        return Err(ResolverError::InvalidMerge(format!(
            "cannot merge {} {} into itself",
            kind, keep_id
        )));
    }
    let keep = db
        .get_entity(kind, keep_id)?
        .ok_or_else(|| ResolverError::NotFound { kind, id: keep_id.to_string() })?;
    let merged = db
        .get_entity(kind, merge_id)?
        .ok_or_else(|| ResolverError::NotFound { kind, id: merge_id.to_string() })?;

    let report = db.merge_entities(kind, &keep, &merged)?;
    log::info!(
        "Merged {} '{}' ({}) into '{}' ({}): {:?}",
        kind,
        merged.name,
        merged.source,
        keep.name,
        keep.source,
        report
    );
    Ok(report)
}

/// Remember that an operator said `a` and `b` are different entities.
pub fn reject(
    db: &OpsDb,
    kind: EntityKind,
    a: &str,
    b: &str,
    actor: &str,
) -> Result<(), ResolverError> {
    if a == b {
        return Err(ResolverError::InvalidMerge(format!(
            "cannot reject a pairing of {} {} with itself",
            kind, a
        )));
    }
    for id in [a, b] {
        if db.get_entity(kind, id)?.is_none() {
            return Err(ResolverError::NotFound { kind, id: id.to_string() });
        }
    }
    db.insert_match_rejection(kind, &pair_key(a, b), actor)?;
    Ok(())
}
