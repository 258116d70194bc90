use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{StoreError, WorkflowError, WorkflowResult};
use crate::orchestrator::Orchestrator;
use crate::state::RunOutcome;

/// Result for one source of a batch, in submission order.
#[derive(Debug)]
pub struct BatchEntry {
    pub source: PathBuf,
    pub result: WorkflowResult<RunOutcome>,
}

/// CSV files directly inside `dir`, sorted by name and capped at
/// `max_files` when given. A cap of zero means no cap.
pub fn discover_sources(dir: &Path, max_files: Option<usize>) -> WorkflowResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|err| StoreError::io(dir, err))?;
    let mut sources = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| StoreError::io(dir, err))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            sources.push(path);
        }
    }
    sources.sort();
    if let Some(cap) = max_files.filter(|cap| *cap > 0) {
        sources.truncate(cap);
    }
    tracing::debug!(event = "sources_discovered", dir = %dir.display(), count = sources.len());
    Ok(sources)
}

/// Drive one run per source concurrently.
///
/// Sources resolving to the same dataset are not queued: the later claimant
/// fails with `DatasetBusy` while the first run is live.
pub async fn run_batch(orchestrator: Arc<Orchestrator>, sources: Vec<PathBuf>) -> Vec<BatchEntry> {
    let mut tasks = JoinSet::new();
    let mut slots: Vec<(PathBuf, Option<WorkflowResult<RunOutcome>>)> =
        Vec::with_capacity(sources.len());

    // Claims are taken in submission order so busy datasets are deterministic.
    for (index, source) in sources.into_iter().enumerate() {
        match orchestrator.start(&source) {
            Ok(record) => {
                let orchestrator = Arc::clone(&orchestrator);
                tasks.spawn(async move {
                    let result = orchestrator.drive(&record.run_id).await;
                    (index, result)
                });
                slots.push((source, None));
            }
            Err(err) => {
                tracing::warn!(event = "batch_source_refused", source = %source.display(), error = %err);
                slots.push((source, Some(Err(err))));
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Some(slot) = slots.get_mut(index) {
                    slot.1 = Some(result);
                }
            }
            Err(err) => {
                tracing::error!(event = "batch_task_failed", error = %err);
            }
        }
    }

    slots
        .into_iter()
        .map(|(source, result)| {
            let result = result.unwrap_or_else(|| {
                Err(WorkflowError::Task(format!(
                    "run for {} did not report",
                    source.display()
                )))
            });
            BatchEntry { source, result }
        })
        .collect()
}
