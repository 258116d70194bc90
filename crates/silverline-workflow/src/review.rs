use std::collections::HashMap;

use serde_json::Value;
use silverline_core::{ColumnSchema, Decision, PendingReview, Rule, RuleOrigin, RuleStatus};
use silverline_rules::{RuleSetError, normalize_rule, validate_rule_set, validate_rule_set_document};

use crate::error::{StoreError, WorkflowError, WorkflowResult};
use crate::store::StateStore;

/// Reviewer decision on a pending rule set.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Approve { note: Option<String> },
    Reject { note: Option<String> },
    Edit { rules: Vec<Rule>, note: Option<String> },
}

/// Reviews still waiting on a decision, oldest first.
pub fn list_open_reviews(store: &StateStore) -> WorkflowResult<Vec<PendingReview>> {
    Ok(store
        .list_reviews()?
        .into_iter()
        .filter(|review| !review.is_decided())
        .collect())
}

pub fn load_review(store: &StateStore, run_id: &str) -> WorkflowResult<PendingReview> {
    store.load_review(run_id)?.ok_or_else(|| {
        WorkflowError::Store(StoreError::NotFound {
            kind: "review",
            id: run_id.to_string(),
        })
    })
}

/// Record a decision for `run_id`. Edited rule sets are revised against the
/// proposal and validated before anything is written.
pub fn submit_decision(
    store: &StateStore,
    run_id: &str,
    decision: ReviewDecision,
) -> WorkflowResult<PendingReview> {
    let mut review = load_review(store, run_id)?;
    if let Some(existing) = review.decision {
        return Err(WorkflowError::InvalidState {
            run_id: run_id.to_string(),
            state: format!("already {}", existing.as_str()),
            action: "deciding",
        });
    }
    match decision {
        ReviewDecision::Approve { note } => review.decide(Decision::Approved, note, None)?,
        ReviewDecision::Reject { note } => review.decide(Decision::Rejected, note, None)?,
        ReviewDecision::Edit { rules, note } => {
            let columns = dataset_columns(store, &review)?;
            let revised = revise_rules(&review.rule_set, rules)?;
            let report = validate_rule_set(&revised, &columns);
            if !report.is_ok() {
                return Err(RuleSetError::Invalid(report).into());
            }
            review.decide(Decision::Edited, note, Some(revised))?;
        }
    }
    store.save_review(&review)?;
    if let Some(record) = review.decision_record() {
        store.append_decision(&record)?;
    }
    tracing::info!(
        event = "review_decided",
        run_id,
        decision = review.decision.map(|decision| decision.as_str()).unwrap_or("none")
    );
    Ok(review)
}

/// Submit an edited rule-set JSON document, checked against the rule-set
/// JSON Schema before the semantic checks.
pub fn submit_edited_document(
    store: &StateStore,
    run_id: &str,
    document: &Value,
    note: Option<String>,
) -> WorkflowResult<PendingReview> {
    let review = load_review(store, run_id)?;
    let columns = dataset_columns(store, &review)?;
    let validated =
        validate_rule_set_document(document, &columns).map_err(RuleSetError::Invalid)?;
    for warning in &validated.warnings {
        tracing::warn!(event = "edited_rule_set_warning", run_id, code = %warning.code, path = %warning.path);
    }
    submit_decision(
        store,
        run_id,
        ReviewDecision::Edit {
            rules: validated.document.rules,
            note,
        },
    )
}

/// Merge a reviewer's rule list into the proposal.
///
/// Unchanged rules keep their revision and become approved; changed rules
/// are revised; unknown ids are reviewer-authored. Rules the reviewer marks
/// rejected stay in the set as rejected. Omitted rules are dropped.
fn revise_rules(proposed: &[Rule], edited: Vec<Rule>) -> WorkflowResult<Vec<Rule>> {
    let by_id: HashMap<&str, &Rule> = proposed.iter().map(|rule| (rule.id.as_str(), rule)).collect();
    let mut revised = Vec::with_capacity(edited.len());
    for rule in edited {
        let rule = normalize_rule(rule);
        let rejected = rule.status == RuleStatus::Rejected;
        let next = match by_id.get(rule.id.as_str()) {
            Some(original) if rejected => (*original).clone().rejected(),
            None if rejected => {
                let mut authored = rule;
                authored.origin = RuleOrigin::Reviewer;
                authored
            }
            Some(original) if original.same_content(&rule) => (*original).clone().approved(),
            Some(original) => original.revise(&rule)?,
            None => {
                let mut authored = rule;
                authored.origin = RuleOrigin::Reviewer;
                authored.status = RuleStatus::Edited;
                authored
            }
        };
        revised.push(next);
    }
    Ok(revised)
}

fn dataset_columns(store: &StateStore, review: &PendingReview) -> WorkflowResult<Vec<ColumnSchema>> {
    let handle = store.get_dataset(&review.dataset_id)?.ok_or_else(|| StoreError::NotFound {
        kind: "dataset",
        id: review.dataset_id.clone(),
    })?;
    Ok(handle.schema)
}

#[cfg(test)]
mod tests {
    use silverline_core::{RuleCheck, RuleId};

    use super::*;

    fn proposed() -> Vec<Rule> {
        vec![
            Rule::new(
                "a-not-null",
                "a required",
                RuleOrigin::Oracle,
                RuleCheck::NotNull {
                    column: "a".to_string(),
                },
            )
            .with_targets(vec!["a".to_string()]),
            Rule::new(
                "b-range",
                "b in range",
                RuleOrigin::Oracle,
                RuleCheck::Range {
                    column: "b".to_string(),
                    min: Some(0.0),
                    max: Some(10.0),
                },
            )
            .with_targets(vec!["b".to_string()]),
        ]
    }

    #[test]
    fn edits_keep_ids_and_bump_changed_revisions() {
        let mut changed = proposed()[1].clone();
        changed.check = RuleCheck::Range {
            column: "b".to_string(),
            min: Some(0.0),
            max: Some(20.0),
        };
        let authored = Rule::new(
            "a-domain",
            "a is known",
            RuleOrigin::Oracle,
            RuleCheck::Domain {
                column: "a".to_string(),
                allowed: vec!["x".to_string()],
            },
        );

        let revised =
            revise_rules(&proposed(), vec![proposed()[0].clone(), changed, authored]).expect("revise");

        assert_eq!(revised[0].revision, 1);
        assert_eq!(revised[0].status, RuleStatus::Approved);
        assert_eq!(revised[1].id, RuleId::new("b-range"));
        assert_eq!(revised[1].revision, 2);
        assert_eq!(revised[1].status, RuleStatus::Edited);
        assert_eq!(revised[1].origin, RuleOrigin::Oracle);
        assert_eq!(revised[2].origin, RuleOrigin::Reviewer);
        assert_eq!(revised[2].target_columns, vec!["a".to_string()]);
        assert!(revised.iter().all(Rule::is_active));
    }

    #[test]
    fn reviewer_rejections_survive_revision() {
        let mut changed = proposed()[1].clone();
        changed.check = RuleCheck::Range {
            column: "b".to_string(),
            min: Some(5.0),
            max: Some(10.0),
        };
        changed.status = RuleStatus::Rejected;
        let unchanged = proposed()[0].clone().rejected();

        let revised = revise_rules(&proposed(), vec![unchanged, changed]).expect("revise");

        assert!(revised.iter().all(|rule| rule.status == RuleStatus::Rejected));
        assert!(revised.iter().all(|rule| !rule.is_active()));
        assert_eq!(revised[1].revision, 1);
        assert_eq!(revised[1].check, proposed()[1].check);
    }
}
