use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or profiling a source dataset.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path} has no header row")]
    MissingHeader { path: PathBuf },
    #[error("row {row} has {found} field(s), expected {expected}")]
    RaggedRow {
        row: u64,
        expected: usize,
        found: usize,
    },
    #[error("source changed since the run started: expected fingerprint {expected}, found {found}")]
    FingerprintMismatch { expected: String, found: String },
    #[error(transparent)]
    Dataset(#[from] silverline_core::Error),
}

pub type Result<T> = std::result::Result<T, InputError>;
