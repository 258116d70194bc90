use std::time::Instant;

use silverline_core::{PartitionResult, RecordBatch, Rule, RuleOrigin};

use crate::enforcer::RuleEnforcer;
use crate::errors::Result;
use crate::metrics::{METRICS_VERSION, RunMetrics};
use crate::model::{ApplyOptions, RuleEvaluationFault};
use crate::output::{OutputLayout, PublishedOutputs};
use crate::partition::partition;
use crate::pii::apply_pii_rules;
use crate::report::render_report;

/// Identity of the run being applied plus warnings raised upstream.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub run_id: String,
    pub dataset_id: String,
    pub rule_origin: RuleOrigin,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub metrics: RunMetrics,
    pub partition: PartitionResult,
    pub faults: Vec<RuleEvaluationFault>,
    pub outputs: PublishedOutputs,
}

/// Runs masking, enforcement and partitioning, then publishes the result.
#[derive(Debug, Clone, Default)]
pub struct ApplyEngine {
    options: ApplyOptions,
}

impl ApplyEngine {
    pub fn new(options: ApplyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Apply `rules` to `batch`. Quality rules only ever see the masked batch.
    pub fn run(
        &self,
        ctx: &ApplyContext,
        batch: &RecordBatch,
        rules: &[Rule],
        layout: &OutputLayout,
    ) -> Result<ApplyOutcome> {
        let started = Instant::now();

        let masked = apply_pii_rules(batch, rules);
        tracing::debug!(
            event = "pii_applied",
            run_id = %ctx.run_id,
            columns = masked.masked_columns.len(),
            fields = masked.fields_masked
        );

        let enforcement = RuleEnforcer::new(self.options.clone()).evaluate(&masked.batch, rules);
        let partition = partition(
            &enforcement.matrix,
            &masked.batch.record_ids(),
            &enforcement.rule_ids,
        )?;

        let mut warnings = ctx.warnings.clone();
        warnings.extend(masked.warnings.iter().cloned());

        let metrics = RunMetrics {
            metrics_version: METRICS_VERSION.to_string(),
            run_id: ctx.run_id.clone(),
            dataset_id: ctx.dataset_id.clone(),
            total: partition.total() as u64,
            passed: partition.clean_records.len() as u64,
            failed: partition.quarantine_records.len() as u64,
            pass_rate: partition.pass_rate,
            pii_fields_masked: masked.fields_masked,
            masked_columns: masked.masked_columns.clone(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            rule_failures: partition
                .rule_failures
                .iter()
                .map(|(rule, count)| (rule.to_string(), *count))
                .collect(),
            evaluation_faults: enforcement.faults.len() as u64,
            rule_origin: ctx.rule_origin.as_str().to_string(),
            warnings,
        };

        let report = render_report(
            &metrics,
            &partition,
            rules,
            &enforcement.faults,
            self.options.report_max_examples,
        );
        let outputs = layout.publish(&masked.batch, &partition, &metrics, &report)?;

        tracing::info!(
            event = "apply_completed",
            run_id = %ctx.run_id,
            dataset_id = %ctx.dataset_id,
            total = metrics.total,
            passed = metrics.passed,
            failed = metrics.failed,
            faults = metrics.evaluation_faults
        );

        Ok(ApplyOutcome {
            metrics,
            partition,
            faults: enforcement.faults,
            outputs,
        })
    }
}
