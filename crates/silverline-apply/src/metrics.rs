use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metrics contract version for apply runs.
pub const METRICS_VERSION: &str = "0.1";

/// Machine-readable summary of one apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub metrics_version: String,
    pub run_id: String,
    pub dataset_id: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub pass_rate: f64,
    pub pii_fields_masked: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_columns: Vec<String>,
    pub processing_time_ms: u64,
    pub rule_failures: BTreeMap<String, u64>,
    pub evaluation_faults: u64,
    /// Where the rule set came from: `oracle`, `fallback` or `reviewer`.
    pub rule_origin: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
