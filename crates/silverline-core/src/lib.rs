//! Core contracts shared across Silverline crates.
//!
//! This crate defines the dataset, profile, rule, review and verdict types
//! that the profiling, rule, apply and workflow crates exchange. It holds no
//! I/O and no behavior beyond invariant checks on the types themselves.

pub mod dataset;
pub mod error;
pub mod profile;
pub mod review;
pub mod rule;
pub mod types;
pub mod verdict;

pub use dataset::{ColumnSchema, DatasetHandle, Record, RecordBatch, RecordId};
pub use error::{Error, Result};
pub use profile::{CardinalityHint, ColumnProfile, DataProfile, EntityType, PiiFinding, ProfileSummary};
pub use review::{Decision, DecisionRecord, PendingReview, prior_rules};
pub use rule::{Rule, RuleCategory, RuleCheck, RuleId, RuleOrigin, RuleSetDocument, RuleStatus};
pub use types::{ColumnType, CoercionError, Scalar, is_null_literal};
pub use verdict::{PartitionResult, VerdictMatrix};

/// Contract version stamped on every persisted artifact.
pub const ARTIFACT_VERSION: &str = "0.1";
