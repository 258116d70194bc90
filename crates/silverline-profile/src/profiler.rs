use std::collections::HashSet;

use silverline_core::{
    CardinalityHint, ColumnProfile, ColumnType, DataProfile, DatasetHandle, RecordBatch,
};

use crate::options::ProfileOptions;
use crate::pii::PiiDetector;

/// Compute column statistics and PII findings over the leading sample.
pub fn profile_batch(
    handle: &DatasetHandle,
    batch: &RecordBatch,
    options: &ProfileOptions,
    detector: &dyn PiiDetector,
) -> DataProfile {
    let sample_len = batch.len().min(options.sample_size);
    let sample = &batch.records()[..sample_len];

    let mut columns = Vec::with_capacity(batch.columns().len());
    let mut pii_findings = Vec::new();

    for (idx, name) in batch.columns().iter().enumerate() {
        let values: Vec<&str> = sample
            .iter()
            .filter_map(|record| record.values[idx].as_deref())
            .collect();
        let non_null = values.len() as u64;
        let distinct = values.iter().collect::<HashSet<_>>().len() as u64;
        let inferred_type = ColumnType::infer(values.iter().copied());

        let (min, max) = match inferred_type {
            Some(column_type) if column_type.is_numeric() => numeric_bounds(&values, column_type),
            _ => (None, None),
        };

        let null_rate = if sample_len == 0 {
            0.0
        } else {
            (sample_len as u64 - non_null) as f64 / sample_len as f64
        };

        columns.push(ColumnProfile {
            name: name.clone(),
            inferred_type,
            null_rate,
            distinct_count: distinct,
            cardinality: CardinalityHint::classify(distinct, non_null),
            min,
            max,
        });

        if let Some(finding) = detector.detect(name, &values) {
            if finding.confidence >= options.min_pii_confidence {
                tracing::debug!(
                    event = "pii_detected",
                    dataset_id = %handle.dataset_id,
                    column = %finding.column,
                    entity = %finding.entity_type,
                    confidence = finding.confidence
                );
                pii_findings.push(finding);
            }
        }
    }

    DataProfile {
        dataset_id: handle.dataset_id.clone(),
        sampled_rows: sample_len as u64,
        total_rows: batch.len() as u64,
        columns,
        pii_findings,
    }
}

fn numeric_bounds(values: &[&str], column_type: ColumnType) -> (Option<f64>, Option<f64>) {
    let numbers = values
        .iter()
        .filter_map(|value| column_type.coerce(value).ok())
        .filter_map(|scalar| scalar.as_f64());
    numbers.fold((None, None), |(min, max), value| {
        (
            Some(min.map_or(value, |current: f64| current.min(value))),
            Some(max.map_or(value, |current: f64| current.max(value))),
        )
    })
}
