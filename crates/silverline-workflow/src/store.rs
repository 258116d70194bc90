use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use silverline_apply::atomic::{sync_dir, write_json_atomic};
use silverline_core::{DatasetHandle, DecisionRecord, PendingReview};

use crate::error::StoreError;
use crate::state::RunRecord;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Contents of a per-dataset claim file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub dataset_id: String,
    pub run_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// File-backed store for catalog entries, run records, reviews and claims.
///
/// Layout under the state root: `catalog/<dataset_id>.json`,
/// `runs/<run_id>.json`, `reviews/<run_id>.json`, `claims/<dataset_id>.claim`,
/// `history/<dataset_id>.json`.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    claims: Mutex<()>,
    history: Mutex<()>,
    open: AtomicBool,
}

impl StateStore {
    /// Open the store, creating its directories when missing.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in ["catalog", "runs", "reviews", "claims", "history"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| StoreError::io(&path, err))?;
        }
        tracing::debug!(event = "store_opened", root = %root.display());
        Ok(Self {
            root,
            claims: Mutex::new(()),
            history: Mutex::new(()),
            open: AtomicBool::new(true),
        })
    }

    /// Refuse further operations. Everything written so far is already durable.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(event = "store_closed", root = %self.root.display());
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn catalog_path(&self, dataset_id: &str) -> PathBuf {
        self.root.join("catalog").join(format!("{dataset_id}.json"))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn review_path(&self, run_id: &str) -> PathBuf {
        self.root.join("reviews").join(format!("{run_id}.json"))
    }

    fn history_path(&self, dataset_id: &str) -> PathBuf {
        self.root.join("history").join(format!("{dataset_id}.json"))
    }

    fn claim_path(&self, dataset_id: &str) -> PathBuf {
        self.root.join("claims").join(format!("{dataset_id}.claim"))
    }

    pub fn put_dataset(&self, handle: &DatasetHandle) -> StoreResult<()> {
        self.ensure_open()?;
        write_json(&self.catalog_path(&handle.dataset_id), handle)
    }

    pub fn get_dataset(&self, dataset_id: &str) -> StoreResult<Option<DatasetHandle>> {
        self.ensure_open()?;
        read_json(&self.catalog_path(dataset_id))
    }

    pub fn save_run(&self, record: &RunRecord) -> StoreResult<()> {
        self.ensure_open()?;
        write_json(&self.run_path(&record.run_id), record)
    }

    pub fn load_run(&self, run_id: &str) -> StoreResult<RunRecord> {
        self.ensure_open()?;
        read_json(&self.run_path(run_id))?.ok_or_else(|| StoreError::NotFound {
            kind: "run",
            id: run_id.to_string(),
        })
    }

    /// Remove a run record that never started, e.g. after a refused claim.
    pub fn delete_run(&self, run_id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let path = self.run_path(run_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    /// Every persisted run, ordered by creation time.
    pub fn list_runs(&self) -> StoreResult<Vec<RunRecord>> {
        self.ensure_open()?;
        let mut runs: Vec<RunRecord> = list_json(&self.root.join("runs"))?;
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }

    /// Write a review for a run that has none. An existing review wins and
    /// is returned unchanged.
    pub fn create_review(&self, review: &PendingReview) -> StoreResult<PendingReview> {
        self.ensure_open()?;
        if let Some(existing) = self.load_review(&review.run_id)? {
            return Ok(existing);
        }
        write_json(&self.review_path(&review.run_id), review)?;
        Ok(review.clone())
    }

    pub fn save_review(&self, review: &PendingReview) -> StoreResult<()> {
        self.ensure_open()?;
        write_json(&self.review_path(&review.run_id), review)
    }

    pub fn load_review(&self, run_id: &str) -> StoreResult<Option<PendingReview>> {
        self.ensure_open()?;
        read_json(&self.review_path(run_id))
    }

    pub fn list_reviews(&self) -> StoreResult<Vec<PendingReview>> {
        self.ensure_open()?;
        let mut reviews: Vec<PendingReview> = list_json(&self.root.join("reviews"))?;
        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(reviews)
    }

    /// Append a decision to its dataset's history. Re-recording a run
    /// replaces its earlier entry.
    pub fn append_decision(&self, record: &DecisionRecord) -> StoreResult<()> {
        self.ensure_open()?;
        let _guard = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.history_path(&record.dataset_id);
        let mut history: Vec<DecisionRecord> = read_json(&path)?.unwrap_or_default();
        history.retain(|entry| entry.run_id != record.run_id);
        history.push(record.clone());
        write_json(&path, &history)
    }

    /// Decisions recorded for `dataset_id`, oldest first.
    pub fn load_history(&self, dataset_id: &str) -> StoreResult<Vec<DecisionRecord>> {
        self.ensure_open()?;
        Ok(read_json(&self.history_path(dataset_id))?.unwrap_or_default())
    }

    /// Claim `dataset_id` for `run_id`.
    ///
    /// A claim held by a terminal or vanished run is taken over; a claim held
    /// by any other live run yields `DatasetBusy`.
    pub fn claim(&self, dataset_id: &str, run_id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let _guard = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.claim_path(dataset_id);
        let claim = ClaimRecord {
            dataset_id: dataset_id.to_string(),
            run_id: run_id.to_string(),
            claimed_at: Utc::now(),
        };

        if try_claim(&path, &claim)? {
            return Ok(());
        }

        let holder = match read_json::<ClaimRecord>(&path) {
            Ok(holder) => holder,
            Err(StoreError::Json { .. }) => {
                tracing::warn!(event = "claim_unreadable", dataset_id, path = %path.display());
                None
            }
            Err(err) => return Err(err),
        };
        if let Some(holder) = &holder {
            if holder.run_id == run_id {
                return Ok(());
            }
            let live = match read_json::<RunRecord>(&self.run_path(&holder.run_id))? {
                Some(record) => !record.is_terminal(),
                None => false,
            };
            if live {
                return Err(StoreError::DatasetBusy {
                    dataset_id: dataset_id.to_string(),
                    run_id: holder.run_id.clone(),
                });
            }
            tracing::info!(
                event = "stale_claim_reclaimed",
                dataset_id,
                previous_run = %holder.run_id,
                run_id
            );
        }

        // Another process may take the freed claim first; it then holds it.
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&path, err)),
        }
        if try_claim(&path, &claim)? {
            return Ok(());
        }
        let winner = read_json::<ClaimRecord>(&path).ok().flatten();
        Err(StoreError::DatasetBusy {
            dataset_id: dataset_id.to_string(),
            run_id: winner.map(|claim| claim.run_id).unwrap_or_default(),
        })
    }

    /// Release the claim on `dataset_id` if `run_id` holds it.
    pub fn release(&self, dataset_id: &str, run_id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let _guard = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.claim_path(dataset_id);
        let holder: Option<ClaimRecord> = read_json(&path)?;
        if holder.is_some_and(|holder| holder.run_id == run_id) {
            fs::remove_file(&path).map_err(|err| StoreError::io(&path, err))?;
        }
        Ok(())
    }

    pub fn claim_holder(&self, dataset_id: &str) -> StoreResult<Option<ClaimRecord>> {
        self.ensure_open()?;
        read_json(&self.claim_path(dataset_id))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    write_json_atomic(path, value).map_err(|err| StoreError::io(path, err))
}

/// Publish `claim` at `path` only if no claim exists there.
///
/// The record is written and synced under a unique temporary name, then
/// hard-linked into place, so the claim file is never observed partially
/// written. Returns false when another claim already holds the path.
fn try_claim(path: &Path, claim: &ClaimRecord) -> StoreResult<bool> {
    let data = serde_json::to_vec_pretty(claim).map_err(|err| StoreError::json(path, err))?;
    let tmp_path = claim_temp_path(path);
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .and_then(|mut file| file.write_all(&data).and_then(|()| file.sync_all()));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, err));
    }

    let linked = fs::hard_link(&tmp_path, path);
    let _ = fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(StoreError::io(path, err)),
    }
    if let Some(parent) = path.parent() {
        sync_dir(parent).map_err(|err| StoreError::io(parent, err))?;
    }
    Ok(true)
}

fn claim_temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StoreError::json(path, err))
}

fn list_json<T: DeserializeOwned>(dir: &Path) -> StoreResult<Vec<T>> {
    let entries = fs::read_dir(dir).map_err(|err| StoreError::io(dir, err))?;
    let mut items = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| StoreError::io(dir, err))?;
        let path = entry.path();
        // Skip in-flight temp files from atomic writes.
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if hidden || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        if let Some(item) = read_json(&path)? {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use silverline_core::Decision;

    use super::*;
    use crate::state::RunState;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().join("state")).expect("open");
        (dir, store)
    }

    #[test]
    fn second_live_run_is_busy() {
        let (_dir, store) = store();
        let first = RunRecord::new("r1", "ds", PathBuf::from("a.csv"));
        store.save_run(&first).expect("save");
        store.claim("ds", "r1").expect("claim");

        let err = store.claim("ds", "r2").unwrap_err();
        assert!(matches!(err, StoreError::DatasetBusy { ref run_id, .. } if run_id == "r1"));
        store.claim("ds", "r1").expect("holder may re-claim");
    }

    #[test]
    fn terminal_holder_is_reclaimed() {
        let (_dir, store) = store();
        let mut first = RunRecord::new("r1", "ds", PathBuf::from("a.csv"));
        store.claim("ds", "r1").expect("claim");
        first.transition(RunState::Completed, None);
        store.save_run(&first).expect("save");

        store.claim("ds", "r2").expect("reclaim");
        assert_eq!(
            store.claim_holder("ds").expect("holder").map(|c| c.run_id),
            Some("r2".to_string())
        );
        store.release("ds", "r1").expect("release by non-holder is a no-op");
        assert!(store.claim_holder("ds").expect("holder").is_some());
        store.release("ds", "r2").expect("release");
        assert!(store.claim_holder("ds").expect("holder").is_none());
    }

    #[test]
    fn partial_claim_is_reclaimed_and_no_temp_files_remain() {
        let (dir, store) = store();
        let claims = dir.path().join("state").join("claims");
        std::fs::write(claims.join("ds.claim"), b"{\"dataset_id\": \"ds\", \"run").expect("write");

        store.claim("ds", "r2").expect("reclaim");
        assert_eq!(
            store.claim_holder("ds").expect("holder").map(|c| c.run_id),
            Some("r2".to_string())
        );

        store.save_run(&RunRecord::new("r2", "ds", PathBuf::from("a.csv"))).expect("save");
        assert!(store.claim("ds", "r3").is_err());
        let names: Vec<String> = std::fs::read_dir(&claims)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ds.claim".to_string()]);
    }

    #[test]
    fn history_appends_per_dataset() {
        let (_dir, store) = store();
        assert!(store.load_history("ds").expect("empty").is_empty());

        let record = |run_id: &str, decision: Decision| DecisionRecord {
            run_id: run_id.to_string(),
            dataset_id: "ds".to_string(),
            decision,
            decided_at: Utc::now(),
            reviewer_note: None,
            rules: Vec::new(),
        };
        store.append_decision(&record("r1", Decision::Approved)).expect("append");
        store.append_decision(&record("r2", Decision::Rejected)).expect("append");
        store.append_decision(&record("r1", Decision::Approved)).expect("re-append");

        let history = store.load_history("ds").expect("history");
        let runs: Vec<&str> = history.iter().map(|entry| entry.run_id.as_str()).collect();
        assert_eq!(runs, vec!["r2", "r1"]);
        assert!(store.load_history("other").expect("other").is_empty());
    }

    #[test]
    fn closed_store_refuses_operations() {
        let (_dir, store) = store();
        store.close();
        assert!(matches!(store.load_run("r1"), Err(StoreError::Closed)));
    }

    #[test]
    fn lists_runs_and_reports_missing_ones() {
        let (_dir, store) = store();
        store
            .save_run(&RunRecord::new("r1", "ds", PathBuf::from("a.csv")))
            .expect("save");
        assert_eq!(store.list_runs().expect("list").len(), 1);
        assert!(matches!(
            store.load_run("nope"),
            Err(StoreError::NotFound { kind: "run", .. })
        ));
    }
}
