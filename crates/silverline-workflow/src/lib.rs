//! Durable orchestration of Silverline runs.
//!
//! A run moves through profiling, rule generation, human approval and apply.
//! Every transition is persisted before the next step begins, so a process
//! can exit while a run awaits approval and a later process resumes it.

pub mod batch;
pub mod config;
pub mod error;
pub mod ids;
pub mod orchestrator;
pub mod review;
pub mod state;
pub mod store;

pub use batch::{BatchEntry, discover_sources, run_batch};
pub use config::{PipelineConfig, load_or_create_config, save_config};
pub use error::{FailureKind, FailureRecord, Stage, StoreError, WorkflowError, WorkflowResult};
pub use ids::new_run_id;
pub use orchestrator::Orchestrator;
pub use review::{ReviewDecision, list_open_reviews, load_review, submit_decision, submit_edited_document};
pub use state::{RunOutcome, RunRecord, RunState, StateTransition};
pub use store::{ClaimRecord, StateStore};
