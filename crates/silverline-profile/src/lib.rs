//! Dataset ingestion and profiling for Silverline.

pub mod error;
pub mod options;
pub mod pii;
pub mod profiler;
pub mod reader;

pub use error::{InputError, Result};
pub use options::ProfileOptions;
pub use pii::{HeuristicPiiDetector, PiiDetector};
pub use profiler::profile_batch;
pub use reader::{dataset_id_for, fingerprint_bytes, load_dataset, reload_dataset};
