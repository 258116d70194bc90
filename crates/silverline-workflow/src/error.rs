use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use silverline_core::Rule;
use thiserror::Error;

/// Errors raised by the durable state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("dataset {dataset_id} is busy with run {run_id}")]
    DatasetBusy { dataset_id: String, run_id: String },
    #[error("state store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced to callers of the orchestrator and review API.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Input(#[from] silverline_profile::InputError),
    #[error(transparent)]
    Apply(#[from] silverline_apply::ApplyError),
    #[error(transparent)]
    RuleSet(#[from] silverline_rules::RuleSetError),
    #[error(transparent)]
    Core(#[from] silverline_core::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("run {run_id} is {state}; {action} is not allowed")]
    InvalidState {
        run_id: String,
        state: String,
        action: &'static str,
    },
    #[error("background task failed: {0}")]
    Task(String),
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Stage in which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Profiling,
    Generating,
    Approval,
    Applying,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Profiling => "profiling",
            Stage::Generating => "generating",
            Stage::Approval => "approval",
            Stage::Applying => "applying",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure class recorded on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputError,
    ApprovalRejected,
    PersistenceError,
    Internal,
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub kind: FailureKind,
    pub reason: String,
    /// Rule set a reviewer rejected, kept for audit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_rules: Vec<Rule>,
}

impl FailureRecord {
    pub fn new(stage: Stage, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            reason: reason.into(),
            rejected_rules: Vec::new(),
        }
    }

    pub fn rejected(rules: Vec<Rule>) -> Self {
        Self {
            stage: Stage::Approval,
            kind: FailureKind::ApprovalRejected,
            reason: "rules rejected".to_string(),
            rejected_rules: rules,
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_stage() {
        let failure = FailureRecord::new(Stage::Profiling, FailureKind::InputError, "missing file");
        assert_eq!(failure.to_string(), "profiling failed: missing file");
        assert_eq!(FailureRecord::rejected(Vec::new()).to_string(), "approval failed: rules rejected");
    }
}
