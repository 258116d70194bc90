use std::collections::{BTreeMap, BTreeSet};

use silverline_core::{Error, PartitionResult, RecordId, Result, RuleId, VerdictMatrix};

/// Split records into clean and quarantined sets.
///
/// A record is clean iff it passes every rule in `rules`. Output ordering
/// follows `RecordId`, never evaluation order. A missing verdict is an error.
pub fn partition(
    matrix: &VerdictMatrix,
    records: &[RecordId],
    rules: &[RuleId],
) -> Result<PartitionResult> {
    if matrix.len() != records.len() {
        return Err(Error::MatrixMismatch(format!(
            "matrix has {} record(s), batch has {}",
            matrix.len(),
            records.len()
        )));
    }

    let mut ordered = records.to_vec();
    ordered.sort_unstable();

    let mut clean_records = Vec::new();
    let mut quarantine_records = Vec::new();
    let mut quarantine_reasons = BTreeMap::new();
    let mut rule_failures: BTreeMap<RuleId, u64> =
        rules.iter().map(|rule| (rule.clone(), 0)).collect();

    for record in ordered {
        let mut failing = BTreeSet::new();
        for rule in rules {
            if !matrix.get(record, rule)? {
                failing.insert(rule.clone());
            }
        }
        if failing.is_empty() {
            clean_records.push(record);
        } else {
            for rule in &failing {
                if let Some(count) = rule_failures.get_mut(rule) {
                    *count += 1;
                }
            }
            quarantine_records.push(record);
            quarantine_reasons.insert(record, failing);
        }
    }

    let total = clean_records.len() + quarantine_records.len();
    let pass_rate = if total == 0 {
        0.0
    } else {
        clean_records.len() as f64 / total as f64
    };

    Ok(PartitionResult {
        clean_records,
        quarantine_records,
        quarantine_reasons,
        pass_rate,
        rule_failures,
    })
}
