use std::collections::HashSet;

use silverline_core::{ColumnType, DataProfile, PiiFinding, Rule, RuleCheck, RuleOrigin};

use crate::validate::normalize_rule;

/// Static rule set used when the oracle cannot produce candidates.
///
/// Always contains a PII transform per finding plus a null check and a type
/// check per typed column. PII columns are checked as text because they are
/// masked before validation runs. Configured rules are appended when every
/// column they target exists.
pub fn fallback_rules(profile: &DataProfile, configured: &[Rule]) -> Vec<Rule> {
    let mut rules = derive_pii_rules(&profile.pii_findings, &[]);

    for column in &profile.columns {
        let Some(inferred) = column.inferred_type else {
            continue;
        };
        let expected = if profile.finding(&column.name).is_some() {
            ColumnType::Text
        } else {
            inferred
        };
        rules.push(Rule::new(
            format!("fallback-not-null-{}", column.name),
            format!("{} must not be null", column.name),
            RuleOrigin::Fallback,
            RuleCheck::NotNull {
                column: column.name.clone(),
            },
        ));
        rules.push(Rule::new(
            format!("fallback-type-{}", column.name),
            format!("{} must be {expected}", column.name),
            RuleOrigin::Fallback,
            RuleCheck::TypeCheck {
                column: column.name.clone(),
                expected,
            },
        ));
    }

    let known: HashSet<&str> = profile.columns.iter().map(|c| c.name.as_str()).collect();
    let mut taken: HashSet<String> = rules.iter().map(|rule| rule.id.0.clone()).collect();
    for rule in configured {
        let mut rule = normalize_rule(rule.clone());
        if taken.contains(rule.id.as_str()) {
            tracing::warn!(event = "fallback_rule_skipped", rule_id = %rule.id, reason = "duplicate id");
            continue;
        }
        if !rule
            .target_columns
            .iter()
            .all(|column| known.contains(column.as_str()))
        {
            tracing::debug!(event = "fallback_rule_skipped", rule_id = %rule.id, reason = "missing column");
            continue;
        }
        rule.origin = RuleOrigin::Fallback;
        taken.insert(rule.id.0.clone());
        rules.push(rule);
    }

    rules
}

/// PII transform rules for every finding whose column `existing` does not
/// already transform.
pub fn derive_pii_rules(findings: &[PiiFinding], existing: &[Rule]) -> Vec<Rule> {
    let covered: HashSet<&str> = existing
        .iter()
        .filter_map(|rule| match &rule.check {
            RuleCheck::PiiTransform { column, .. } => Some(column.as_str()),
            _ => None,
        })
        .collect();

    findings
        .iter()
        .filter(|finding| !covered.contains(finding.column.as_str()))
        .map(|finding| {
            Rule::new(
                format!("pii-{}", finding.column),
                format!("mask {} as {}", finding.column, finding.entity_type),
                RuleOrigin::Fallback,
                RuleCheck::PiiTransform {
                    column: finding.column.clone(),
                    entity: finding.entity_type.clone(),
                },
            )
        })
        .collect()
}
