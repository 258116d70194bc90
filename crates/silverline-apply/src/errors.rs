use thiserror::Error;

/// Errors raised while applying approved rules to a batch.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Core(#[from] silverline_core::Error),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Errors raised while publishing partitions and run artifacts.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid output path: {0}")]
    InvalidPath(String),
    #[error("record {0} is not in the batch")]
    MissingRecord(silverline_core::RecordId),
}

pub type Result<T> = std::result::Result<T, ApplyError>;
