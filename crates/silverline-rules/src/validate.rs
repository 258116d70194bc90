use std::collections::{BTreeSet, HashSet};

use jsonschema::JSONSchema;
use regex::Regex;
use serde_json::Value;
use silverline_core::{ARTIFACT_VERSION, ColumnSchema, Rule, RuleCheck, RuleSetDocument};

use crate::errors::{RuleSetError, ValidationIssue, ValidationReport};
use crate::expression::Expression;
use crate::schema::rule_set_json_schema_value;

/// Validated rule set with accumulated warnings.
#[derive(Debug, Clone)]
pub struct ValidatedRuleSet {
    pub document: RuleSetDocument,
    pub warnings: Vec<ValidationIssue>,
}

/// Validate a rule-set JSON document against the rule-set JSON Schema.
pub fn validate_rule_set_json(
    document: &Value,
    schema: &Value,
) -> Result<ValidationReport, RuleSetError> {
    let compiled =
        JSONSchema::compile(schema).map_err(|err| RuleSetError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();
    if let Err(errors) = compiled.validate(document) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push(ValidationIssue::error("schema_violation", path, error.to_string()));
        }
    }
    Ok(report)
}

/// Validate the document end-to-end: structure first, then semantics
/// against the dataset's columns.
pub fn validate_rule_set_document(
    document: &Value,
    columns: &[ColumnSchema],
) -> Result<ValidatedRuleSet, ValidationReport> {
    let structural = match validate_rule_set_json(document, &rule_set_json_schema_value()) {
        Ok(report) => report,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push(ValidationIssue::error(
                "schema_validation_error",
                "/",
                err.to_string(),
            ));
            return Err(report);
        }
    };
    if !structural.is_ok() {
        return Err(structural);
    }

    let mut parsed: RuleSetDocument = match serde_json::from_value(document.clone()) {
        Ok(parsed) => parsed,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push(ValidationIssue::error("invalid_rule_set_json", "/", err.to_string()));
            return Err(report);
        }
    };

    parsed.rules = parsed.rules.into_iter().map(normalize_rule).collect();
    let mut report = validate_rule_set(&parsed.rules, columns);
    if parsed.version != ARTIFACT_VERSION {
        report.push(
            ValidationIssue::warning(
                "version_mismatch",
                "/version",
                format!(
                    "document version '{}' differs from '{ARTIFACT_VERSION}'",
                    parsed.version
                ),
            )
            .with_hint(format!("set version to \"{ARTIFACT_VERSION}\"")),
        );
    }
    if !report.is_ok() {
        return Err(report);
    }

    Ok(ValidatedRuleSet {
        document: parsed,
        warnings: report.warnings,
    })
}

/// Fill empty target columns from the check, including the columns a
/// consistency expression references.
pub fn normalize_rule(mut rule: Rule) -> Rule {
    if rule.target_columns.is_empty() {
        rule.target_columns = match &rule.check {
            RuleCheck::Consistency { expression } => Expression::parse(expression)
                .map(|parsed| parsed.columns().into_iter().collect())
                .unwrap_or_default(),
            check => check.columns().unwrap_or_default(),
        };
    }
    rule
}

/// Semantic checks for a rule set against the dataset's columns.
pub fn validate_rule_set(rules: &[Rule], columns: &[ColumnSchema]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let known: HashSet<&str> = columns.iter().map(|column| column.name.as_str()).collect();
    let mut seen_ids = HashSet::new();

    for (idx, rule) in rules.iter().enumerate() {
        let path = format!("/rules/{idx}");

        if rule.id.as_str().trim().is_empty() {
            report.push(ValidationIssue::error(
                "empty_rule_id",
                format!("{path}/id"),
                "rule id must not be empty",
            ));
        } else if !seen_ids.insert(rule.id.as_str()) {
            report.push(ValidationIssue::error(
                "duplicate_rule_id",
                format!("{path}/id"),
                format!("rule id '{}' is used more than once", rule.id),
            ));
        }

        if rule.category != rule.check.category() {
            report.push(
                ValidationIssue::error(
                    "category_mismatch",
                    format!("{path}/category"),
                    format!(
                        "category '{}' does not match check kind '{}'",
                        rule.category,
                        rule.check.category()
                    ),
                )
                .with_hint(format!("set category to \"{}\"", rule.check.category())),
            );
        }

        let expected_targets = expected_targets(&rule.check);
        if let Some(expected) = &expected_targets {
            let declared: BTreeSet<&str> = rule.target_columns.iter().map(String::as_str).collect();
            let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
            if declared != expected_set {
                report.push(ValidationIssue::error(
                    "target_mismatch",
                    format!("{path}/target_columns"),
                    format!(
                        "target columns {:?} do not match the columns the check reads {:?}",
                        rule.target_columns, expected
                    ),
                ));
            }
        }

        for column in expected_targets.iter().flatten() {
            if !known.contains(column.as_str()) {
                report.push(
                    ValidationIssue::error(
                        "unknown_column",
                        format!("{path}/check"),
                        format!("column '{column}' does not exist in the dataset"),
                    )
                    .with_hint("check the dataset schema for valid column names"),
                );
            }
        }

        validate_check(&rule.check, &format!("{path}/check"), &mut report);
    }

    report
}

fn expected_targets(check: &RuleCheck) -> Option<Vec<String>> {
    match check {
        RuleCheck::Consistency { expression } => Expression::parse(expression)
            .ok()
            .map(|parsed| parsed.columns().into_iter().collect()),
        other => other.columns(),
    }
}

fn validate_check(check: &RuleCheck, path: &str, report: &mut ValidationReport) {
    match check {
        RuleCheck::PiiTransform { entity, .. } => {
            if !entity.is_known() {
                report.push(ValidationIssue::warning(
                    "unknown_entity",
                    format!("{path}/entity"),
                    format!("entity '{entity}' has no masking strategy and will pass through"),
                ));
            }
        }
        RuleCheck::NotNull { .. } | RuleCheck::TypeCheck { .. } => {}
        RuleCheck::Range { min, max, .. } => match (min, max) {
            (None, None) => report.push(ValidationIssue::error(
                "empty_range",
                path,
                "range needs at least one of min or max",
            )),
            (Some(min), Some(max)) if min > max => report.push(ValidationIssue::error(
                "invalid_range",
                path,
                format!("min {min} is greater than max {max}"),
            )),
            _ => {}
        },
        RuleCheck::Pattern { regex, .. } => {
            if let Err(err) = Regex::new(regex) {
                report.push(ValidationIssue::error(
                    "invalid_regex",
                    format!("{path}/regex"),
                    err.to_string(),
                ));
            }
        }
        RuleCheck::Consistency { expression } => match Expression::parse(expression) {
            Ok(parsed) => {
                let count = parsed.columns().len();
                if count < 2 {
                    report.push(
                        ValidationIssue::error(
                            "too_few_columns",
                            format!("{path}/expression"),
                            format!("consistency expressions must reference at least 2 columns, found {count}"),
                        )
                        .with_hint("use a range, domain or not_null check for single columns"),
                    );
                }
            }
            Err(err) => report.push(ValidationIssue::error(
                "invalid_expression",
                format!("{path}/expression"),
                err.to_string(),
            )),
        },
        RuleCheck::Uniqueness { columns } => {
            if columns.is_empty() {
                report.push(ValidationIssue::error(
                    "empty_columns",
                    format!("{path}/columns"),
                    "uniqueness needs at least one column",
                ));
            }
            let distinct: HashSet<&String> = columns.iter().collect();
            if distinct.len() != columns.len() {
                report.push(ValidationIssue::warning(
                    "duplicate_columns",
                    format!("{path}/columns"),
                    "uniqueness key lists a column more than once",
                ));
            }
        }
        RuleCheck::Domain { allowed, .. } => {
            if allowed.is_empty() {
                report.push(ValidationIssue::error(
                    "empty_domain",
                    format!("{path}/allowed"),
                    "domain needs at least one allowed value",
                ));
            }
        }
        RuleCheck::Outlier { low, high, .. } => {
            for (name, value) in [("low", low), ("high", high)] {
                if let Some(value) = value {
                    if !(0.0..=1.0).contains(value) {
                        report.push(ValidationIssue::error(
                            "invalid_quantiles",
                            format!("{path}/{name}"),
                            format!("quantile {value} is outside [0, 1]"),
                        ));
                    }
                }
            }
            if let (Some(low), Some(high)) = (low, high) {
                if low >= high {
                    report.push(ValidationIssue::error(
                        "invalid_quantiles",
                        path,
                        format!("low quantile {low} must be below high quantile {high}"),
                    ));
                }
            }
        }
    }
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use silverline_core::{ColumnType, EntityType, RuleOrigin};

    use super::*;

    fn columns() -> Vec<ColumnSchema> {
        ["id", "email", "start", "end"]
            .into_iter()
            .map(|name| ColumnSchema {
                name: name.to_string(),
                inferred_type: Some(ColumnType::Text),
            })
            .collect()
    }

    fn rule(id: &str, check: RuleCheck) -> Rule {
        normalize_rule(Rule::new(id, id, RuleOrigin::Oracle, check))
    }

    fn codes(report: &ValidationReport) -> Vec<&str> {
        report.errors.iter().map(|issue| issue.code.as_str()).collect()
    }

    #[test]
    fn well_formed_rules_pass() {
        let rules = vec![
            rule("r1", RuleCheck::NotNull { column: "id".to_string() }),
            rule(
                "r2",
                RuleCheck::Consistency {
                    expression: "start <= end".to_string(),
                },
            ),
            rule(
                "r3",
                RuleCheck::PiiTransform {
                    column: "email".to_string(),
                    entity: EntityType::EmailAddress,
                },
            ),
        ];
        let report = validate_rule_set(&rules, &columns());
        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(rules[1].target_columns, vec!["end".to_string(), "start".to_string()]);
    }

    #[test]
    fn reports_semantic_problems() {
        let rules = vec![
            rule("dup", RuleCheck::NotNull { column: "missing".to_string() }),
            rule("dup", RuleCheck::Pattern { column: "id".to_string(), regex: "(".to_string() }),
            rule(
                "r3",
                RuleCheck::Consistency {
                    expression: "start > 0".to_string(),
                },
            ),
            rule(
                "r4",
                RuleCheck::Range {
                    column: "id".to_string(),
                    min: Some(5.0),
                    max: Some(1.0),
                },
            ),
            rule(
                "r5",
                RuleCheck::Outlier {
                    column: "id".to_string(),
                    low: Some(0.9),
                    high: Some(0.1),
                },
            ),
        ];
        let report = validate_rule_set(&rules, &columns());
        let codes = codes(&report);
        for expected in [
            "unknown_column",
            "duplicate_rule_id",
            "invalid_regex",
            "too_few_columns",
            "invalid_range",
            "invalid_quantiles",
        ] {
            assert!(codes.contains(&expected), "missing {expected} in {codes:?}");
        }
    }

    #[test]
    fn category_and_target_mismatches_are_flagged() {
        let mut edited = rule("r1", RuleCheck::NotNull { column: "id".to_string() });
        edited.category = silverline_core::RuleCategory::Range;
        edited.target_columns = vec!["email".to_string()];
        let report = validate_rule_set(&[edited], &columns());
        let codes = codes(&report);
        assert!(codes.contains(&"category_mismatch"));
        assert!(codes.contains(&"target_mismatch"));
    }

    #[test]
    fn document_is_checked_against_schema() {
        let bad = serde_json::json!({ "version": "0.1", "rules": [{ "id": "r1" }] });
        let report = validate_rule_set_document(&bad, &columns()).unwrap_err();
        assert!(report.errors.iter().any(|issue| issue.code == "schema_violation"));

        let good = serde_json::to_value(RuleSetDocument::new(
            None,
            vec![rule("r1", RuleCheck::NotNull { column: "id".to_string() })],
        ))
        .expect("serialize");
        let validated = validate_rule_set_document(&good, &columns()).expect("valid");
        assert_eq!(validated.document.rules.len(), 1);
        assert!(validated.warnings.is_empty());
    }
}
