use std::collections::BTreeSet;

use proptest::prelude::*;
use silverline_apply::partition;
use silverline_core::{RecordId, RuleId, VerdictMatrix};

fn matrix_strategy() -> impl Strategy<Value = (usize, usize, Vec<bool>)> {
    (0usize..40, 0usize..6).prop_flat_map(|(records, rules)| {
        (
            Just(records),
            Just(rules),
            proptest::collection::vec(any::<bool>(), records * rules),
        )
    })
}

proptest! {
    #[test]
    fn clean_iff_every_rule_passes((n, m, cells) in matrix_strategy()) {
        // Ids are shuffled relative to insertion order.
        let records: Vec<RecordId> = (0..n as u64).rev().map(|i| RecordId(i * 7 + 1)).collect();
        let rules: Vec<RuleId> = (0..m).map(|j| RuleId::new(format!("rule-{j}"))).collect();

        let mut matrix = VerdictMatrix::for_records(records.iter().copied());
        for (i, record) in records.iter().enumerate() {
            for (j, rule) in rules.iter().enumerate() {
                matrix.insert(*record, rule.clone(), cells[i * m + j]);
            }
        }

        let result = partition(&matrix, &records, &rules).expect("partition");

        prop_assert_eq!(result.total(), n);
        let clean: BTreeSet<_> = result.clean_records.iter().copied().collect();
        let quarantined: BTreeSet<_> = result.quarantine_records.iter().copied().collect();
        prop_assert!(clean.is_disjoint(&quarantined));
        prop_assert!(result.clean_records.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(result.quarantine_records.windows(2).all(|w| w[0] < w[1]));

        for (i, record) in records.iter().enumerate() {
            let passes_all = (0..m).all(|j| cells[i * m + j]);
            prop_assert_eq!(clean.contains(record), passes_all);
            if !passes_all {
                let reasons = result.failing_rules(*record).expect("reasons");
                prop_assert!(!reasons.is_empty());
                for (j, rule) in rules.iter().enumerate() {
                    prop_assert_eq!(reasons.contains(rule), !cells[i * m + j]);
                }
            }
        }

        for (j, rule) in rules.iter().enumerate() {
            let expected = (0..n).filter(|i| !cells[i * m + j]).count() as u64;
            prop_assert_eq!(result.rule_failures[rule], expected);
        }

        if n > 0 {
            prop_assert!((result.pass_rate - clean.len() as f64 / n as f64).abs() < 1e-12);
        }
    }
}
