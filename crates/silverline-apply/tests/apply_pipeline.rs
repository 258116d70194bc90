use std::fs;

use silverline_apply::{ApplyContext, ApplyEngine, ApplyOptions, OutputLayout, RunMetrics};
use silverline_core::{EntityType, RecordBatch, RecordId, Rule, RuleCheck, RuleId, RuleOrigin};

fn batch() -> RecordBatch {
    let rows = [
        ["1", "ana@acme.io", "20", "open"],
        ["2", "bob@acme.io", "250", "open"],
        ["3", "", "30", "closed"],
        ["4", "dan@corp.io", "40", "lost"],
        ["5", "eve@corp.io", "", "open"],
    ];
    RecordBatch::from_rows(
        vec![
            "id".to_string(),
            "email".to_string(),
            "amount".to_string(),
            "status".to_string(),
        ],
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    )
    .expect("batch")
}

fn rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "pii-email",
            "mask email",
            RuleOrigin::Oracle,
            RuleCheck::PiiTransform {
                column: "email".to_string(),
                entity: EntityType::EmailAddress,
            },
        )
        .approved(),
        Rule::new(
            "email-not-null",
            "email is required",
            RuleOrigin::Oracle,
            RuleCheck::NotNull {
                column: "email".to_string(),
            },
        )
        .approved(),
        Rule::new(
            "amount-range",
            "amount between 0 and 100",
            RuleOrigin::Oracle,
            RuleCheck::Range {
                column: "amount".to_string(),
                min: Some(0.0),
                max: Some(100.0),
            },
        )
        .approved(),
        Rule::new(
            "status-domain",
            "status is known",
            RuleOrigin::Oracle,
            RuleCheck::Domain {
                column: "status".to_string(),
                allowed: vec!["open".to_string(), "closed".to_string()],
            },
        )
        .approved(),
        Rule::new(
            "email-raw-pattern",
            "proposed only, never enforced",
            RuleOrigin::Oracle,
            RuleCheck::Pattern {
                column: "email".to_string(),
                regex: "nothing".to_string(),
            },
        ),
    ]
}

fn context(run_id: &str) -> ApplyContext {
    ApplyContext {
        run_id: run_id.to_string(),
        dataset_id: "orders".to_string(),
        rule_origin: RuleOrigin::Oracle,
        warnings: vec!["oracle attempt 1 timed out".to_string()],
    }
}

#[test]
fn pipeline_masks_enforces_and_publishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = OutputLayout::new(dir.path());
    let engine = ApplyEngine::new(ApplyOptions::default());

    let outcome = engine
        .run(&context("run-1"), &batch(), &rules(), &layout)
        .expect("apply");

    assert_eq!(
        outcome.partition.clean_records,
        vec![RecordId(1), RecordId(5)]
    );
    assert_eq!(
        outcome.partition.quarantine_records,
        vec![RecordId(2), RecordId(3), RecordId(4)]
    );
    assert_eq!(outcome.partition.rule_failures[&RuleId::new("amount-range")], 1);
    assert_eq!(outcome.partition.rule_failures[&RuleId::new("email-not-null")], 1);
    assert_eq!(outcome.partition.rule_failures[&RuleId::new("status-domain")], 1);
    assert!(
        !outcome
            .partition
            .rule_failures
            .contains_key(&RuleId::new("email-raw-pattern"))
    );

    let silver = fs::read_to_string(&outcome.outputs.silver).expect("silver");
    assert!(silver.contains("***@acme.io"));
    assert!(!silver.contains("ana@acme.io"));
    let quarantine = fs::read_to_string(&outcome.outputs.quarantine).expect("quarantine");
    assert!(quarantine.lines().next().expect("header").ends_with(",_failed_rules"));
    assert!(quarantine.contains("amount-range"));

    let metrics: RunMetrics =
        serde_json::from_slice(&fs::read(&outcome.outputs.metrics).expect("metrics"))
            .expect("parse metrics");
    assert_eq!(metrics.total, 5);
    assert_eq!(metrics.passed, 2);
    assert_eq!(metrics.pii_fields_masked, 4);
    assert_eq!(metrics.masked_columns, vec!["email".to_string()]);
    assert_eq!(metrics.rule_origin, "oracle");
    assert_eq!(metrics.warnings, vec!["oracle attempt 1 timed out".to_string()]);

    let report = fs::read_to_string(&outcome.outputs.report).expect("report");
    assert!(report.contains("## Quarantine examples"));
    assert!(report.contains("oracle attempt 1 timed out"));
}

#[test]
fn unknown_column_faults_fail_records_without_aborting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = OutputLayout::new(dir.path());
    let mut rules = rules();
    rules.push(
        Rule::new(
            "ghost",
            "references a missing column",
            RuleOrigin::Oracle,
            RuleCheck::Consistency {
                expression: "ghost > amount".to_string(),
            },
        )
        .approved(),
    );

    let outcome = ApplyEngine::default()
        .run(&context("run-2"), &batch(), &rules, &layout)
        .expect("apply");

    assert!(outcome.partition.clean_records.is_empty());
    assert_eq!(outcome.faults.len(), 5);
    assert_eq!(outcome.metrics.evaluation_faults, 5);
    assert!(layout.is_published("orders", "run-2"));
}

#[test]
fn unmaskable_entity_is_left_in_place_with_a_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = OutputLayout::new(dir.path());
    let rules = vec![
        Rule::new(
            "pii-status",
            "mask status",
            RuleOrigin::Oracle,
            RuleCheck::PiiTransform {
                column: "status".to_string(),
                entity: EntityType::Other("NRP".to_string()),
            },
        )
        .approved(),
    ];

    let outcome = ApplyEngine::default()
        .run(&context("run-3"), &batch(), &rules, &layout)
        .expect("apply");

    assert_eq!(outcome.partition.clean_records.len(), 5);
    let silver = fs::read_to_string(&outcome.outputs.silver).expect("silver");
    assert!(silver.contains("closed"));
    assert!(silver.contains("lost"));
    assert!(outcome.metrics.masked_columns.is_empty());
    assert_eq!(outcome.metrics.pii_fields_masked, 0);
    assert!(
        outcome
            .metrics
            .warnings
            .iter()
            .any(|warning| warning.contains("NRP") && warning.contains("status"))
    );
}
