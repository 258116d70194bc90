use serde::{Deserialize, Serialize};
use silverline_core::{RecordId, RuleId};

/// Options for the apply stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Default (low, high) quantiles for outlier rules without explicit bounds.
    pub outlier_quantiles: (f64, f64),
    /// Limit the number of examples emitted in the report.
    pub report_max_examples: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            outlier_quantiles: (0.01, 0.99),
            report_max_examples: 20,
        }
    }
}

/// A predicate could not be evaluated for a record; the record fails the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluationFault {
    pub rule_id: RuleId,
    pub record_id: RecordId,
    pub message: String,
}
