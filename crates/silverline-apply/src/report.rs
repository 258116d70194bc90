use silverline_core::{PartitionResult, Rule};

use crate::metrics::RunMetrics;
use crate::model::RuleEvaluationFault;

/// Render a deterministic markdown report for one apply run.
pub fn render_report(
    metrics: &RunMetrics,
    partition: &PartitionResult,
    rules: &[Rule],
    faults: &[RuleEvaluationFault],
    max_examples: usize,
) -> String {
    let mut lines = Vec::new();

    lines.push("# Silverline Run Report".to_string());
    lines.push(String::new());
    lines.push("## Run summary".to_string());
    lines.push(format!("- run_id: {}", metrics.run_id));
    lines.push(format!("- dataset_id: {}", metrics.dataset_id));
    lines.push(format!("- rule_origin: {}", metrics.rule_origin));
    lines.push(format!("- records: {}", metrics.total));
    lines.push(format!("- clean: {}", metrics.passed));
    lines.push(format!("- quarantined: {}", metrics.failed));
    lines.push(format!("- pass_rate: {:.4}", metrics.pass_rate));
    lines.push(format!("- processing_time_ms: {}", metrics.processing_time_ms));
    lines.push(String::new());

    lines.push("## PII transformation".to_string());
    if metrics.masked_columns.is_empty() {
        lines.push("- no columns masked".to_string());
    } else {
        lines.push(format!("- columns: {}", metrics.masked_columns.join(", ")));
        lines.push(format!("- fields masked: {}", metrics.pii_fields_masked));
    }
    lines.push(String::new());

    lines.push("## Rule failures".to_string());
    lines.push("| rule | category | revision | failures |".to_string());
    lines.push("| --- | --- | --- | --- |".to_string());
    for (rule_id, failures) in &partition.rule_failures {
        let (category, revision) = rules
            .iter()
            .find(|rule| &rule.id == rule_id)
            .map(|rule| (rule.category.to_string(), rule.revision.to_string()))
            .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
        lines.push(format!("| {rule_id} | {category} | {revision} | {failures} |"));
    }
    lines.push(String::new());

    if !metrics.warnings.is_empty() {
        lines.push("## Warnings".to_string());
        for warning in &metrics.warnings {
            lines.push(format!("- {warning}"));
        }
        lines.push(String::new());
    }

    if !faults.is_empty() {
        lines.push("## Evaluation faults".to_string());
        for fault in faults.iter().take(max_examples) {
            lines.push(format!(
                "- {} record {}: {}",
                fault.rule_id, fault.record_id, fault.message
            ));
        }
        if faults.len() > max_examples {
            lines.push(format!("- ... {} more", faults.len() - max_examples));
        }
        lines.push(String::new());
    }

    if !partition.quarantine_records.is_empty() {
        lines.push("## Quarantine examples".to_string());
        for (record, reasons) in partition.quarantine_reasons.iter().take(max_examples) {
            let reasons: Vec<&str> = reasons.iter().map(|rule| rule.as_str()).collect();
            lines.push(format!("- record {record}: {}", reasons.join(", ")));
        }
        lines.push(String::new());
    }

    lines.push("## Recommendations".to_string());
    lines.extend(recommendations(metrics, partition));
    lines.join("\n")
}

fn recommendations(metrics: &RunMetrics, partition: &PartitionResult) -> Vec<String> {
    let mut lines = Vec::new();
    if metrics.evaluation_faults > 0 {
        lines.push("- fix rules that fault; faulting records are quarantined.".to_string());
    }
    if metrics.total > 0 && metrics.pass_rate < 0.5 {
        lines.push("- more than half the records failed; review the approved rules.".to_string());
    }
    if partition.rule_failures.values().any(|count| *count == metrics.total && metrics.total > 0) {
        lines.push("- a rule rejects every record; check its target columns.".to_string());
    }
    if lines.is_empty() {
        lines.push("- no action required; compare metrics across runs for drift.".to_string());
    }
    lines
}
