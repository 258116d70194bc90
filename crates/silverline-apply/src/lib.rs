//! Apply stage: PII masking, rule enforcement, partitioning and publishing.

pub mod atomic;
pub mod enforcer;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod output;
pub mod partition;
pub mod pii;
pub mod report;

pub use enforcer::{Enforcement, RuleEnforcer};
pub use engine::{ApplyContext, ApplyEngine, ApplyOutcome};
pub use errors::{ApplyError, PublishError};
pub use metrics::{METRICS_VERSION, RunMetrics};
pub use model::{ApplyOptions, RuleEvaluationFault};
pub use output::{OutputLayout, PublishedOutputs};
pub use partition::partition;
pub use pii::{MaskOutcome, apply_pii_rules, mask_value};
pub use report::render_report;
