use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use silverline_apply::ApplyOptions;
use silverline_apply::atomic::write_bytes_atomic;
use silverline_core::Rule;
use silverline_profile::ProfileOptions;

use crate::error::{StoreError, WorkflowError, WorkflowResult};

/// Pipeline configuration bundle, stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub sample_size: usize,
    pub approval_poll_interval_secs: u64,
    pub approval_max_wait_secs: Option<u64>,
    pub outlier_quantiles: (f64, f64),
    pub oracle_timeout_secs: u64,
    pub oracle_max_attempts: u32,
    pub oracle_retry_backoff_ms: u64,
    /// Directory holding `<dataset_id>.rules.json` candidate files.
    pub oracle_dir: Option<PathBuf>,
    pub min_pii_confidence: f64,
    pub report_max_examples: usize,
    pub fallback_rule_set: Vec<Rule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("silverline-data"),
            sample_size: 1000,
            approval_poll_interval_secs: 5,
            approval_max_wait_secs: None,
            outlier_quantiles: (0.01, 0.99),
            oracle_timeout_secs: 30,
            oracle_max_attempts: 2,
            oracle_retry_backoff_ms: 500,
            oracle_dir: None,
            min_pii_confidence: 0.5,
            report_max_examples: 20,
            fallback_rule_set: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.sample_size == 0 {
            return Err(WorkflowError::Config("sample_size must be positive".to_string()));
        }
        let (low, high) = self.outlier_quantiles;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(WorkflowError::Config(format!(
                "outlier_quantiles ({low}, {high}) must satisfy 0 <= low < high <= 1"
            )));
        }
        if self.oracle_max_attempts == 0 {
            return Err(WorkflowError::Config(
                "oracle_max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_pii_confidence) {
            return Err(WorkflowError::Config(
                "min_pii_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.approval_poll_interval_secs == 0 {
            return Err(WorkflowError::Config(
                "approval_poll_interval_secs must be positive".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        for rule in &self.fallback_rule_set {
            if rule.id.as_str().trim().is_empty() {
                return Err(WorkflowError::Config(
                    "fallback_rule_set contains a rule with an empty id".to_string(),
                ));
            }
            if !ids.insert(rule.id.as_str()) {
                return Err(WorkflowError::Config(format!(
                    "fallback_rule_set uses rule id '{}' more than once",
                    rule.id
                )));
            }
        }
        Ok(())
    }

    pub fn state_root(&self) -> PathBuf {
        self.data_root.join("state")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_root.join("logs").join("silverline.ndjson")
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn oracle_backoff(&self) -> Duration {
        Duration::from_millis(self.oracle_retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.approval_poll_interval_secs)
    }

    pub fn profile_options(&self) -> ProfileOptions {
        ProfileOptions {
            sample_size: self.sample_size,
            min_pii_confidence: self.min_pii_confidence,
        }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            outlier_quantiles: self.outlier_quantiles,
            report_max_examples: self.report_max_examples,
        }
    }
}

/// Load the config at `path`, writing defaults there when it does not exist.
pub fn load_or_create_config(path: &Path) -> WorkflowResult<PipelineConfig> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        return Ok(config);
    }

    let config = PipelineConfig::default();
    save_config(path, &config)?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &PipelineConfig) -> WorkflowResult<()> {
    let encoded = toml::to_string_pretty(config)?;
    write_bytes_atomic(path, encoded.as_bytes()).map_err(|err| StoreError::io(path, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config").join("silverline.toml");

        let created = load_or_create_config(&path).expect("create");
        assert!(path.exists());
        let loaded = load_or_create_config(&path).expect("load");
        assert_eq!(created, loaded);
        assert_eq!(loaded.sample_size, 1000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("silverline.toml");
        std::fs::write(&path, "sample_size = 50\noracle_max_attempts = 3\n").expect("write");

        let config = load_or_create_config(&path).expect("load");
        assert_eq!(config.sample_size, 50);
        assert_eq!(config.oracle_max_attempts, 3);
        assert_eq!(config.oracle_timeout_secs, 30);
    }

    #[test]
    fn rejects_bad_values() {
        let config = PipelineConfig {
            outlier_quantiles: (0.9, 0.1),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorkflowError::Config(_))));

        let config = PipelineConfig {
            oracle_max_attempts: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_fallback_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("silverline.toml");
        let rule = r#"
[[fallback_rule_set]]
id = "dup"
text = "id present"
category = "null-check"
target_columns = ["id"]
status = "approved"
origin = "reviewer"

[fallback_rule_set.check]
kind = "not_null"
column = "id"
"#;
        std::fs::write(&path, format!("{rule}{rule}")).expect("write");

        let err = load_or_create_config(&path).expect_err("duplicate ids");
        assert!(matches!(err, WorkflowError::Config(message) if message.contains("dup")));
    }
}
