use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use regex::Regex;
use silverline_core::{ColumnType, RecordBatch, RecordId, Rule, RuleCheck, RuleId, VerdictMatrix};
use silverline_rules::Expression;

use crate::model::{ApplyOptions, RuleEvaluationFault};

/// Verdicts and faults produced by evaluating a rule set over a batch.
#[derive(Debug, Clone, Default)]
pub struct Enforcement {
    pub matrix: VerdictMatrix,
    /// Rules evaluated, in id order.
    pub rule_ids: Vec<RuleId>,
    pub faults: Vec<RuleEvaluationFault>,
}

/// Evaluates quality rules independently and merges them deterministically.
#[derive(Debug, Clone)]
pub struct RuleEnforcer {
    options: ApplyOptions,
}

struct RuleVerdicts {
    rule_id: RuleId,
    verdicts: Vec<(RecordId, bool)>,
    faults: Vec<RuleEvaluationFault>,
}

impl RuleEnforcer {
    pub fn new(options: ApplyOptions) -> Self {
        Self { options }
    }

    /// Evaluate every active non-PII rule against every record.
    pub fn evaluate(&self, batch: &RecordBatch, rules: &[Rule]) -> Enforcement {
        let mut active: Vec<&Rule> = rules
            .iter()
            .filter(|rule| rule.is_active() && !rule.is_pii_transform())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));

        let results: Vec<RuleVerdicts> = active
            .par_iter()
            .map(|rule| self.evaluate_rule(batch, rule))
            .collect();

        let mut enforcement = Enforcement {
            matrix: VerdictMatrix::for_records(batch.record_ids()),
            rule_ids: Vec::with_capacity(results.len()),
            faults: Vec::new(),
        };
        for result in results {
            if !result.faults.is_empty() {
                tracing::warn!(
                    event = "rule_faults",
                    rule_id = %result.rule_id,
                    faults = result.faults.len(),
                    first = %result.faults[0].message
                );
            }
            enforcement.matrix.merge_rule(&result.rule_id, result.verdicts);
            enforcement.faults.extend(result.faults);
            enforcement.rule_ids.push(result.rule_id);
        }
        enforcement
    }

    fn evaluate_rule(&self, batch: &RecordBatch, rule: &Rule) -> RuleVerdicts {
        let mut out = RuleVerdicts {
            rule_id: rule.id.clone(),
            verdicts: Vec::with_capacity(batch.len()),
            faults: Vec::new(),
        };

        let predicate = match self.compile(batch, &rule.check) {
            Ok(predicate) => predicate,
            Err(message) => {
                for record in batch.records() {
                    out.fail_with_fault(record.id, message.clone());
                }
                return out;
            }
        };

        for record in batch.records() {
            match predicate.test(record.id, &record.values) {
                Ok(passed) => out.verdicts.push((record.id, passed)),
                Err(message) => out.fail_with_fault(record.id, message),
            }
        }
        out
    }

    /// Resolve columns and precompute batch-wide state for a check.
    fn compile<'b>(
        &self,
        batch: &'b RecordBatch,
        check: &'b RuleCheck,
    ) -> Result<Predicate<'b>, String> {
        let column = |name: &str| {
            batch
                .column_index(name)
                .ok_or_else(|| format!("unknown column: {name}"))
        };

        let predicate = match check {
            RuleCheck::PiiTransform { .. } => {
                return Err("pii transforms are not quality predicates".to_string());
            }
            RuleCheck::NotNull { column: name } => Predicate::NotNull(column(name)?),
            RuleCheck::TypeCheck {
                column: name,
                expected,
            } => Predicate::Type(column(name)?, *expected),
            RuleCheck::Range {
                column: name,
                min,
                max,
            } => Predicate::Range(column(name)?, *min, *max),
            RuleCheck::Pattern {
                column: name,
                regex,
            } => {
                let anchored = Regex::new(&format!("^(?:{regex})$"))
                    .map_err(|err| format!("invalid regex: {err}"))?;
                Predicate::Pattern(column(name)?, anchored)
            }
            RuleCheck::Consistency { expression } => {
                let parsed = Expression::parse(expression).map_err(|err| err.to_string())?;
                Predicate::Consistency(parsed, batch)
            }
            RuleCheck::Uniqueness { columns } => {
                let indices = columns
                    .iter()
                    .map(|name| column(name))
                    .collect::<Result<Vec<_>, _>>()?;
                Predicate::Unique(duplicate_records(batch, &indices))
            }
            RuleCheck::Domain {
                column: name,
                allowed,
            } => Predicate::Domain(column(name)?, allowed.iter().map(String::as_str).collect()),
            RuleCheck::Outlier {
                column: name,
                low,
                high,
            } => {
                let idx = column(name)?;
                let low = low.unwrap_or(self.options.outlier_quantiles.0);
                let high = high.unwrap_or(self.options.outlier_quantiles.1);
                Predicate::Outlier(idx, outlier_bounds(batch, idx, low, high))
            }
        };
        Ok(predicate)
    }
}

impl RuleVerdicts {
    fn fail_with_fault(&mut self, record_id: RecordId, message: String) {
        self.verdicts.push((record_id, false));
        self.faults.push(RuleEvaluationFault {
            rule_id: self.rule_id.clone(),
            record_id,
            message,
        });
    }
}

enum Predicate<'b> {
    NotNull(usize),
    Type(usize, ColumnType),
    Range(usize, Option<f64>, Option<f64>),
    Pattern(usize, Regex),
    Consistency(Expression, &'b RecordBatch),
    Unique(HashSet<RecordId>),
    Domain(usize, Vec<&'b str>),
    /// Column index and the inclusive value bounds, `None` when the column
    /// has no numeric values.
    Outlier(usize, Option<(f64, f64)>),
}

impl Predicate<'_> {
    /// `Ok(pass)` or `Err(fault)`. Nulls pass everything except `NotNull`.
    fn test(&self, record: RecordId, values: &[Option<String>]) -> Result<bool, String> {
        let cell = |idx: usize| values.get(idx).and_then(|value| value.as_deref());
        match self {
            Predicate::NotNull(idx) => Ok(cell(*idx).is_some()),
            Predicate::Type(idx, expected) => {
                Ok(cell(*idx).is_none_or(|value| expected.coerce(value).is_ok()))
            }
            Predicate::Range(idx, min, max) => {
                let Some(raw) = cell(*idx) else {
                    return Ok(true);
                };
                let value = numeric(raw)?;
                Ok(min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max))
            }
            Predicate::Pattern(idx, regex) => Ok(cell(*idx).is_none_or(|value| regex.is_match(value))),
            Predicate::Consistency(expression, batch) => expression
                .evaluate(&|name| batch.column_index(name).map(cell))
                .map_err(|err| err.to_string()),
            Predicate::Unique(duplicates) => Ok(!duplicates.contains(&record)),
            Predicate::Domain(idx, allowed) => {
                Ok(cell(*idx).is_none_or(|value| allowed.contains(&value.trim())))
            }
            Predicate::Outlier(idx, bounds) => {
                let Some(raw) = cell(*idx) else {
                    return Ok(true);
                };
                let value = numeric(raw)?;
                Ok(bounds.is_none_or(|(low, high)| value >= low && value <= high))
            }
        }
    }
}

fn numeric(raw: &str) -> Result<f64, String> {
    ColumnType::Float
        .coerce(raw)
        .ok()
        .and_then(|scalar| scalar.as_f64())
        .ok_or_else(|| format!("'{raw}' is not numeric"))
}

/// Records that share a complete key with another record. Keys with a null
/// component are exempt.
fn duplicate_records(batch: &RecordBatch, indices: &[usize]) -> HashSet<RecordId> {
    let mut groups: HashMap<Vec<&str>, Vec<RecordId>> = HashMap::new();
    for record in batch.records() {
        let key: Option<Vec<&str>> = indices
            .iter()
            .map(|idx| record.values[*idx].as_deref())
            .collect();
        if let Some(key) = key {
            groups.entry(key).or_default().push(record.id);
        }
    }
    groups
        .into_values()
        .filter(|members| members.len() > 1)
        .flatten()
        .collect()
}

/// Quantile bounds of a column's numeric values, linear interpolation.
fn outlier_bounds(batch: &RecordBatch, idx: usize, low: f64, high: f64) -> Option<(f64, f64)> {
    let mut values: Vec<f64> = batch
        .records()
        .iter()
        .filter_map(|record| record.values[idx].as_deref())
        .filter_map(|raw| numeric(raw).ok())
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some((quantile(&values, low), quantile(&values, high)))
}

pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use silverline_core::{EntityType, RuleOrigin};

    use super::*;

    fn batch(columns: &[&str], rows: &[&[&str]]) -> RecordBatch {
        RecordBatch::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
        .expect("batch")
    }

    fn rule(id: &str, check: RuleCheck) -> Rule {
        Rule::new(id, id, RuleOrigin::Oracle, check).approved()
    }

    fn verdicts(enforcement: &Enforcement, rule_id: &str) -> Vec<bool> {
        let rule_id = RuleId::new(rule_id);
        enforcement
            .matrix
            .records()
            .map(|record| enforcement.matrix.get(record, &rule_id).expect("verdict"))
            .collect()
    }

    #[test]
    fn nulls_pass_everything_but_not_null() {
        let batch = batch(&["v"], &[&["5"], &[""]]);
        let rules = vec![
            rule("a-null", RuleCheck::NotNull { column: "v".to_string() }),
            rule(
                "b-range",
                RuleCheck::Range {
                    column: "v".to_string(),
                    min: Some(0.0),
                    max: Some(10.0),
                },
            ),
            rule(
                "c-domain",
                RuleCheck::Domain {
                    column: "v".to_string(),
                    allowed: vec!["5".to_string()],
                },
            ),
            rule(
                "d-pattern",
                RuleCheck::Pattern {
                    column: "v".to_string(),
                    regex: r"\d".to_string(),
                },
            ),
        ];
        let enforcement = RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &rules);
        assert_eq!(verdicts(&enforcement, "a-null"), vec![true, false]);
        assert_eq!(verdicts(&enforcement, "b-range"), vec![true, true]);
        assert_eq!(verdicts(&enforcement, "c-domain"), vec![true, true]);
        assert_eq!(verdicts(&enforcement, "d-pattern"), vec![true, true]);
        assert!(enforcement.faults.is_empty());
    }

    #[test]
    fn pattern_must_match_whole_value() {
        let batch = batch(&["code"], &[&["AB12"], &["xAB12"]]);
        let rules = vec![rule(
            "code",
            RuleCheck::Pattern {
                column: "code".to_string(),
                regex: "[A-Z]{2}[0-9]{2}".to_string(),
            },
        )];
        let enforcement = RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &rules);
        assert_eq!(verdicts(&enforcement, "code"), vec![true, false]);
    }

    #[test]
    fn faults_fail_the_record_and_are_recorded() {
        let batch = batch(&["age", "b"], &[&["12", "1"], &["abc", "2"]]);
        let rules = vec![
            rule(
                "age-range",
                RuleCheck::Range {
                    column: "age".to_string(),
                    min: Some(0.0),
                    max: None,
                },
            ),
            rule("ghost", RuleCheck::NotNull { column: "ghost".to_string() }),
            rule(
                "expr",
                RuleCheck::Consistency {
                    expression: "age < missing".to_string(),
                },
            ),
        ];
        let enforcement = RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &rules);
        assert_eq!(verdicts(&enforcement, "age-range"), vec![true, false]);
        assert_eq!(verdicts(&enforcement, "ghost"), vec![false, false]);
        assert_eq!(verdicts(&enforcement, "expr"), vec![false, false]);
        assert_eq!(enforcement.faults.len(), 5);
        assert_eq!(
            enforcement.rule_ids,
            vec![RuleId::new("age-range"), RuleId::new("expr"), RuleId::new("ghost")]
        );
    }

    #[test]
    fn uniqueness_flags_every_duplicate_and_exempts_null_keys() {
        let batch = batch(
            &["a", "b"],
            &[&["1", "x"], &["1", "x"], &["2", "x"], &["", "x"], &["", "x"]],
        );
        let rules = vec![rule(
            "uniq",
            RuleCheck::Uniqueness {
                columns: vec!["a".to_string(), "b".to_string()],
            },
        )];
        let enforcement = RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &rules);
        assert_eq!(verdicts(&enforcement, "uniq"), vec![false, false, true, true, true]);
    }

    #[test]
    fn outliers_use_interpolated_quantiles() {
        let rows: Vec<Vec<String>> = (1..=100)
            .map(|n| vec![n.to_string()])
            .chain(std::iter::once(vec!["10000".to_string()]))
            .collect();
        let batch = RecordBatch::from_rows(vec!["v".to_string()], rows).expect("batch");
        let rules = vec![rule(
            "v-outlier",
            RuleCheck::Outlier {
                column: "v".to_string(),
                low: Some(0.0),
                high: Some(0.995),
            },
        )];
        let enforcement = RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &rules);
        let verdicts = verdicts(&enforcement, "v-outlier");
        assert!(verdicts[..100].iter().all(|passed| *passed));
        assert!(!verdicts[100]);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
    }

    #[test]
    fn ignores_pii_and_inactive_rules() {
        let batch = batch(&["v"], &[&["1"]]);
        let proposed = Rule::new(
            "proposed",
            "proposed",
            RuleOrigin::Oracle,
            RuleCheck::NotNull { column: "v".to_string() },
        );
        let mask = Rule::new(
            "mask-v",
            "mask v",
            RuleOrigin::Oracle,
            RuleCheck::PiiTransform {
                column: "v".to_string(),
                entity: EntityType::Person,
            },
        )
        .approved();
        let enforcement =
            RuleEnforcer::new(ApplyOptions::default()).evaluate(&batch, &[proposed, mask]);
        assert!(enforcement.rule_ids.is_empty());
        assert_eq!(enforcement.matrix.len(), 1);
    }
}
