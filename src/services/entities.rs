use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::MergeReport;
use crate::entity::EntityKind;
use crate::resolver::{self, MatchSuggestion, ResolverError};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Confirm,
    Reject,
}

/// An operator's answer to one suggestion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDecision {
    pub keep_id: String,
    pub merge_id: String,
    pub entity_kind: EntityKind,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum DecisionOutcome {
    Merged { report: MergeReport },
    Rejected,
}

pub fn list_suggestions(
    state: &AppState,
    kind: EntityKind,
) -> Result<Vec<MatchSuggestion>, ResolverError> {
    resolver::find_matches(&state.db.lock(), kind)
}

/// Merge or reject a suggested pair and audit the decision.
pub fn resolve_suggestion(
    state: &AppState,
    decision: &MergeDecision,
    actor: &str,
) -> Result<DecisionOutcome, ResolverError> {
    let db = state.db.lock();
    let kind = decision.entity_kind;
    let target = format!("{}:{}", kind, decision.keep_id);

    match decision.decision {
        Decision::Confirm => {
            let report = resolver::merge(&db, kind, &decision.keep_id, &decision.merge_id)?;
            crate::audit::record(
                &db,
                actor,
                "entity.merge",
                &target,
                Some(&json!({ "mergeId": decision.merge_id, "report": report })),
            );
            Ok(DecisionOutcome::Merged { report })
        }
        Decision::Reject => {
            resolver::reject(&db, kind, &decision.keep_id, &decision.merge_id, actor)?;
            crate::audit::record(
                &db,
                actor,
                "entity.reject",
                &target,
                Some(&json!({ "otherId": decision.merge_id })),
            );
            Ok(DecisionOutcome::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    fn seed(state: &AppState) -> (String, String) {
        let db = state.db.lock();
        let a = db.insert_entity(EntityKind::Client, "Acme Pty Ltd", "harvest", None).unwrap();
        let b = db.insert_entity(EntityKind::Client, "ACME", "hubspot", None).unwrap();
        (a, b)
    }

    #[test]
    fn test_confirm_merges_and_audits() {
        let state = test_state();
        let (a, b) = seed(&state);
        assert_eq!(list_suggestions(&state, EntityKind::Client).unwrap().len(), 1);

        let outcome = resolve_suggestion(
            &state,
            &MergeDecision {
                keep_id: a.clone(),
                merge_id: b.clone(),
                entity_kind: EntityKind::Client,
                decision: Decision::Confirm,
            },
            "ops",
        )
        .unwrap();
        assert!(matches!(outcome, DecisionOutcome::Merged { .. }));
        assert!(list_suggestions(&state, EntityKind::Client).unwrap().is_empty());

        let db = state.db.lock();
        assert!(db.get_entity(EntityKind::Client, &b).unwrap().is_none());
        let entries = db.list_audit_entries(5).unwrap();
        assert_eq!(entries[0].action, "entity.merge");
        assert_eq!(entries[0].target, format!("client:{}", a));
    }

    #[test]
    fn test_reject_suppresses_suggestion() {
        let state = test_state();
        let (a, b) = seed(&state);

        resolve_suggestion(
            &state,
            &MergeDecision {
                keep_id: a,
                merge_id: b,
                entity_kind: EntityKind::Client,
                decision: Decision::Reject,
            },
            "ops",
        )
        .unwrap();
        assert!(list_suggestions(&state, EntityKind::Client).unwrap().is_empty());
    }

    #[test]
    fn test_failed_merge_is_not_audited() {
        let state = test_state();
        let (a, _) = seed(&state);
        let err = resolve_suggestion(
            &state,
            &MergeDecision {
                keep_id: a,
                merge_id: "missing".into(),
                entity_kind: EntityKind::Client,
                decision: Decision::Confirm,
            },
            "ops",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "client not found: missing");
        assert!(state.db.lock().list_audit_entries(5).unwrap().is_empty());
    }

    #[test]
    fn test_decision_deserializes_from_camel_case() {
        let decision: MergeDecision = serde_json::from_str(
            r#"{"keepId": "a", "mergeId": "b", "entityKind": "staff", "decision": "reject"}"#,
        )
        .unwrap();
        assert_eq!(decision.entity_kind, EntityKind::Staff);
        assert_eq!(decision.decision, Decision::Reject);
    }
}
