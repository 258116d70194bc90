use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use silverline_apply::{PublishedOutputs, RunMetrics};
use silverline_core::{ARTIFACT_VERSION, DatasetHandle, RuleOrigin};

use crate::error::FailureRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Profiling,
    Generating,
    PendingRetry,
    AwaitingApproval,
    Applying,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Profiling => "PROFILING",
            RunState::Generating => "GENERATING",
            RunState::PendingRetry => "PENDING_RETRY",
            RunState::AwaitingApproval => "AWAITING_APPROVAL",
            RunState::Applying => "APPLYING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: Option<RunState>,
    pub to: RunState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Durable record of one run, rewritten on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub artifact_version: String,
    pub run_id: String,
    pub dataset_id: String,
    pub source: PathBuf,
    #[serde(default)]
    pub handle: Option<DatasetHandle>,
    pub state: RunState,
    #[serde(default)]
    pub oracle_attempts: u32,
    #[serde(default)]
    pub rule_origin: Option<RuleOrigin>,
    /// Recovered problems carried into the run report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub history: Vec<StateTransition>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub outputs: Option<PublishedOutputs>,
    #[serde(default)]
    pub metrics: Option<RunMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, dataset_id: impl Into<String>, source: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            artifact_version: ARTIFACT_VERSION.to_string(),
            run_id: run_id.into(),
            dataset_id: dataset_id.into(),
            source,
            handle: None,
            state: RunState::Profiling,
            oracle_attempts: 0,
            rule_origin: None,
            warnings: Vec::new(),
            history: vec![StateTransition {
                from: None,
                to: RunState::Profiling,
                at: now,
                note: None,
            }],
            failure: None,
            outputs: None,
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, to: RunState, note: Option<String>) {
        let now = Utc::now();
        self.history.push(StateTransition {
            from: Some(self.state),
            to,
            at: now,
            note,
        });
        self.state = to;
        self.updated_at = now;
    }

    pub fn fail(&mut self, failure: FailureRecord) {
        let note = failure.to_string();
        self.failure = Some(failure);
        self.transition(RunState::Failed, Some(note));
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        match self.state {
            RunState::AwaitingApproval => Some(RunOutcome::AwaitingApproval {
                run_id: self.run_id.clone(),
            }),
            RunState::Completed => Some(RunOutcome::Completed {
                run_id: self.run_id.clone(),
                pass_rate: self.metrics.as_ref().map(|metrics| metrics.pass_rate),
                outputs: self.outputs.clone(),
            }),
            RunState::Failed => Some(RunOutcome::Failed {
                run_id: self.run_id.clone(),
                failure: self.failure.clone(),
            }),
            _ => None,
        }
    }
}

/// Where `drive` left a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    AwaitingApproval {
        run_id: String,
    },
    Completed {
        run_id: String,
        pass_rate: Option<f64>,
        outputs: Option<PublishedOutputs>,
    },
    Failed {
        run_id: String,
        failure: Option<FailureRecord>,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            RunOutcome::AwaitingApproval { run_id }
            | RunOutcome::Completed { run_id, .. }
            | RunOutcome::Failed { run_id, .. } => run_id,
        }
    }

    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::AwaitingApproval { .. } => RunState::AwaitingApproval,
            RunOutcome::Completed { .. } => RunState::Completed,
            RunOutcome::Failed { .. } => RunState::Failed,
        }
    }
}
