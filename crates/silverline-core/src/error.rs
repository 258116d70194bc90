use thiserror::Error;

use crate::dataset::RecordId;
use crate::rule::RuleId;

/// Core error type shared across Silverline crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The batch shape violates internal invariants.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
    /// A rule or rule transition violates invariants.
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    /// A verdict matrix is missing a record/rule entry.
    #[error("verdict missing for record {record} and rule {rule}")]
    MissingVerdict { record: RecordId, rule: RuleId },
    /// A record appears in the verdict matrix but not in the batch (or vice versa).
    #[error("verdict matrix does not match batch: {0}")]
    MatrixMismatch(String),
}

/// Convenience alias for results returned by Silverline crates.
pub type Result<T> = std::result::Result<T, Error>;
