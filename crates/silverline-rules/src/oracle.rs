use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use silverline_core::{DataProfile, Rule, RuleOrigin, RuleSetDocument, RuleStatus};

use crate::errors::OracleError;

/// Source of candidate rules for a profiled dataset.
#[async_trait]
pub trait RuleOracle: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Propose rules for the profile. `prior` holds the rules reviewers last
    /// approved for the same dataset. `Ok(vec![])` is a valid answer.
    async fn generate(&self, profile: &DataProfile, prior: &[Rule]) -> Result<Vec<Rule>, OracleError>;
}

/// Call the oracle, mapping an elapsed deadline to `OracleError::Timeout`.
pub async fn generate_with_timeout(
    oracle: &dyn RuleOracle,
    profile: &DataProfile,
    prior: &[Rule],
    timeout: Duration,
) -> Result<Vec<Rule>, OracleError> {
    match tokio::time::timeout(timeout, oracle.generate(profile, prior)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Reads externally authored candidates from `<dir>/<dataset_id>.rules.json`.
#[derive(Debug, Clone)]
pub struct FileOracle {
    dir: PathBuf,
}

impl FileOracle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, dataset_id: &str) -> PathBuf {
        self.dir.join(format!("{dataset_id}.rules.json"))
    }
}

#[async_trait]
impl RuleOracle for FileOracle {
    fn name(&self) -> &str {
        "file"
    }

    async fn generate(&self, profile: &DataProfile, prior: &[Rule]) -> Result<Vec<Rule>, OracleError> {
        let path = self.path_for(&profile.dataset_id);
        tracing::debug!(
            event = "file_oracle_read",
            path = %path.display(),
            prior_rules = prior.len()
        );
        let document = tokio::task::spawn_blocking(move || read_document(&path))
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))??;

        Ok(document
            .rules
            .into_iter()
            .map(|mut rule| {
                rule.origin = RuleOrigin::Oracle;
                rule.status = RuleStatus::Proposed;
                rule
            })
            .collect())
    }
}

fn read_document(path: &Path) -> Result<RuleSetDocument, OracleError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(OracleError::Unavailable(format!(
                "no candidate rules at {}",
                path.display()
            )));
        }
        Err(err) => return Err(OracleError::Unavailable(err.to_string())),
    };
    serde_json::from_str(&data).map_err(|err| OracleError::Malformed(err.to_string()))
}

/// Oracle that is never reachable, forcing the fallback rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOracle;

#[async_trait]
impl RuleOracle for NullOracle {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(&self, _profile: &DataProfile, _prior: &[Rule]) -> Result<Vec<Rule>, OracleError> {
        Err(OracleError::Unavailable("no oracle configured".to_string()))
    }
}
