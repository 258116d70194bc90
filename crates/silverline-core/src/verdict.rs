use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dataset::RecordId;
use crate::error::{Error, Result};
use crate::rule::RuleId;

/// Per-record, per-rule pass/fail outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerdictMatrix {
    entries: BTreeMap<RecordId, BTreeMap<RuleId, bool>>,
}

impl VerdictMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a matrix with an empty row for every record.
    pub fn for_records(records: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            entries: records
                .into_iter()
                .map(|record| (record, BTreeMap::new()))
                .collect(),
        }
    }

    pub fn insert(&mut self, record: RecordId, rule: RuleId, passed: bool) {
        self.entries.entry(record).or_default().insert(rule, passed);
    }

    /// Merge one rule's verdicts for many records.
    pub fn merge_rule(&mut self, rule: &RuleId, verdicts: impl IntoIterator<Item = (RecordId, bool)>) {
        for (record, passed) in verdicts {
            self.insert(record, rule.clone(), passed);
        }
    }

    pub fn get(&self, record: RecordId, rule: &RuleId) -> Result<bool> {
        self.entries
            .get(&record)
            .and_then(|row| row.get(rule))
            .copied()
            .ok_or_else(|| Error::MissingVerdict {
                record,
                rule: rule.clone(),
            })
    }

    pub fn row(&self, record: RecordId) -> Option<&BTreeMap<RuleId, bool>> {
        self.entries.get(&record)
    }

    pub fn records(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clean/quarantine split derived from a verdict matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub clean_records: Vec<RecordId>,
    pub quarantine_records: Vec<RecordId>,
    pub quarantine_reasons: BTreeMap<RecordId, BTreeSet<RuleId>>,
    pub pass_rate: f64,
    pub rule_failures: BTreeMap<RuleId, u64>,
}

impl PartitionResult {
    pub fn total(&self) -> usize {
        self.clean_records.len() + self.quarantine_records.len()
    }

    pub fn is_clean(&self, record: RecordId) -> bool {
        self.clean_records.binary_search(&record).is_ok()
    }

    pub fn failing_rules(&self, record: RecordId) -> Option<&BTreeSet<RuleId>> {
        self.quarantine_reasons.get(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_is_an_error() {
        let mut matrix = VerdictMatrix::for_records([RecordId(1)]);
        let rule = RuleId::new("r1");
        assert!(matches!(
            matrix.get(RecordId(1), &rule),
            Err(Error::MissingVerdict { .. })
        ));
        matrix.insert(RecordId(1), rule.clone(), false);
        assert!(!matrix.get(RecordId(1), &rule).expect("verdict"));
    }
}
