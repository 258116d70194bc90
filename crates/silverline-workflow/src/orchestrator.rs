use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use silverline_apply::{ApplyContext, ApplyEngine, ApplyError, ApplyOutcome, OutputLayout, RunMetrics};
use silverline_core::{
    DataProfile, DatasetHandle, Decision, PendingReview, Rule, RuleOrigin, prior_rules,
};
use silverline_profile::{
    HeuristicPiiDetector, InputError, PiiDetector, dataset_id_for, load_dataset, profile_batch,
    reload_dataset,
};
use silverline_rules::{
    RuleOracle, derive_pii_rules, fallback_rules, generate_with_timeout, normalize_rule,
    validate_rule_set,
};

use crate::config::PipelineConfig;
use crate::error::{FailureKind, FailureRecord, Stage, StoreError, WorkflowError, WorkflowResult};
use crate::ids::new_run_id;
use crate::review::{ReviewDecision, submit_decision};
use crate::state::{RunOutcome, RunRecord, RunState};
use crate::store::StateStore;

/// Drives runs through their states, persisting every transition.
pub struct Orchestrator {
    store: Arc<StateStore>,
    config: PipelineConfig,
    oracle: Arc<dyn RuleOracle>,
    detector: Arc<dyn PiiDetector>,
    layout: OutputLayout,
}

enum ApplyFailure {
    Input(InputError),
    Apply(ApplyError),
}

impl Orchestrator {
    pub fn new(store: Arc<StateStore>, config: PipelineConfig, oracle: Arc<dyn RuleOracle>) -> Self {
        let layout = OutputLayout::new(config.data_root.clone());
        Self {
            store,
            config,
            oracle,
            detector: Arc::new(HeuristicPiiDetector::new()),
            layout,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn PiiDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Register a new run for `source` and claim its dataset.
    pub fn start(&self, source: &Path) -> WorkflowResult<RunRecord> {
        let source = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
        let dataset_id = dataset_id_for(&source);
        let record = RunRecord::new(new_run_id(), dataset_id, source);

        // The record exists before the claim so a concurrent claimant sees a live holder.
        self.store.save_run(&record)?;
        if let Err(err) = self.store.claim(&record.dataset_id, &record.run_id) {
            self.store.delete_run(&record.run_id)?;
            return Err(err.into());
        }

        tracing::info!(
            event = "run_started",
            run_id = %record.run_id,
            dataset_id = %record.dataset_id,
            source = %record.source.display()
        );
        Ok(record)
    }

    /// Start a run and drive it until it rests.
    pub async fn run(&self, source: &Path) -> WorkflowResult<RunOutcome> {
        let record = self.start(source)?;
        self.drive(&record.run_id).await
    }

    /// Advance a run until it completes, fails or waits on a reviewer.
    pub async fn drive(&self, run_id: &str) -> WorkflowResult<RunOutcome> {
        let mut record = self.store.load_run(run_id)?;
        let mut profile: Option<DataProfile> = None;

        loop {
            match record.state {
                RunState::Profiling => self.profile(&mut record, &mut profile).await?,
                RunState::Generating => self.generate(&mut record, &mut profile).await?,
                RunState::PendingRetry => {
                    tokio::time::sleep(self.config.oracle_backoff()).await;
                    self.advance(&mut record, RunState::Generating, None)?;
                }
                RunState::AwaitingApproval => {
                    if !self.check_approval(&mut record)? {
                        tracing::info!(event = "awaiting_approval", run_id = %record.run_id);
                        return Ok(RunOutcome::AwaitingApproval {
                            run_id: record.run_id,
                        });
                    }
                }
                RunState::Applying => self.apply(&mut record).await?,
                RunState::Completed => {
                    self.store.release(&record.dataset_id, &record.run_id)?;
                    return Ok(RunOutcome::Completed {
                        run_id: record.run_id,
                        pass_rate: record.metrics.map(|metrics| metrics.pass_rate),
                        outputs: record.outputs,
                    });
                }
                RunState::Failed => {
                    self.store.release(&record.dataset_id, &record.run_id)?;
                    return Ok(RunOutcome::Failed {
                        run_id: record.run_id,
                        failure: record.failure,
                    });
                }
            }
        }
    }

    /// Continue a persisted run from its recorded state.
    pub async fn resume(&self, run_id: &str) -> WorkflowResult<RunOutcome> {
        tracing::info!(event = "run_resumed", run_id);
        self.drive(run_id).await
    }

    /// Resume every non-terminal run, oldest first.
    pub async fn resume_all(&self) -> WorkflowResult<Vec<(String, WorkflowResult<RunOutcome>)>> {
        let pending: Vec<String> = self
            .store
            .list_runs()?
            .into_iter()
            .filter(|record| !record.is_terminal())
            .map(|record| record.run_id)
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for run_id in pending {
            let outcome = self.resume(&run_id).await;
            if let Err(err) = &outcome {
                tracing::error!(event = "resume_failed", run_id = %run_id, error = %err);
            }
            results.push((run_id, outcome));
        }
        Ok(results)
    }

    /// Reject a run that is waiting on approval, then settle it.
    pub async fn cancel(&self, run_id: &str) -> WorkflowResult<RunOutcome> {
        let record = self.store.load_run(run_id)?;
        if record.state != RunState::AwaitingApproval {
            return Err(WorkflowError::InvalidState {
                run_id: run_id.to_string(),
                state: record.state.to_string(),
                action: "cancel",
            });
        }
        submit_decision(
            &self.store,
            run_id,
            ReviewDecision::Reject {
                note: Some("cancelled".to_string()),
            },
        )?;
        tracing::info!(event = "run_cancelled", run_id);
        self.drive(run_id).await
    }

    /// Drive the run, then poll its review until a decision arrives or the
    /// configured maximum wait elapses.
    pub async fn wait_for_decision(&self, run_id: &str) -> WorkflowResult<RunOutcome> {
        let outcome = self.drive(run_id).await?;
        if !matches!(outcome, RunOutcome::AwaitingApproval { .. }) {
            return Ok(outcome);
        }

        let started = Instant::now();
        let max_wait = self.config.approval_max_wait_secs.map(Duration::from_secs);
        loop {
            let decided = self
                .store
                .load_review(run_id)?
                .is_some_and(|review| review.is_decided());
            if decided {
                return self.drive(run_id).await;
            }

            let mut pause = self.config.poll_interval();
            if let Some(max_wait) = max_wait {
                let elapsed = started.elapsed();
                if elapsed >= max_wait {
                    return Ok(outcome);
                }
                pause = pause.min(max_wait - elapsed);
            }
            tokio::time::sleep(pause).await;
        }
    }

    async fn profile(
        &self,
        record: &mut RunRecord,
        cache: &mut Option<DataProfile>,
    ) -> WorkflowResult<()> {
        let source = record.source.clone();
        let dataset_id = record.dataset_id.clone();
        let options = self.config.profile_options();
        let detector = Arc::clone(&self.detector);

        let loaded = blocking(move || -> Result<(DatasetHandle, DataProfile), InputError> {
            let (mut handle, batch) = load_dataset(&source)?;
            handle.dataset_id = dataset_id;
            let profile = profile_batch(&handle, &batch, &options, detector.as_ref());
            Ok((handle, profile))
        })
        .await?;

        match loaded {
            Ok((handle, profile)) => {
                tracing::info!(
                    event = "dataset_profiled",
                    run_id = %record.run_id,
                    rows = handle.row_count,
                    pii_columns = profile.pii_findings.len()
                );
                self.store.put_dataset(&handle)?;
                record.handle = Some(handle);
                *cache = Some(profile);
                self.advance(record, RunState::Generating, None)
            }
            Err(err) => self.fail(
                record,
                FailureRecord::new(Stage::Profiling, FailureKind::InputError, err.to_string()),
            ),
        }
    }

    async fn generate(
        &self,
        record: &mut RunRecord,
        cache: &mut Option<DataProfile>,
    ) -> WorkflowResult<()> {
        if self.store.load_review(&record.run_id)?.is_some() {
            tracing::debug!(event = "review_exists", run_id = %record.run_id);
            return self.advance(
                record,
                RunState::AwaitingApproval,
                Some("review already recorded".to_string()),
            );
        }

        let profile = match cache.clone() {
            Some(profile) => profile,
            None => match self.reprofile(record).await? {
                Ok(profile) => {
                    *cache = Some(profile.clone());
                    profile
                }
                Err(err) => {
                    return self.fail(
                        record,
                        FailureRecord::new(Stage::Generating, FailureKind::InputError, err.to_string()),
                    );
                }
            },
        };

        record.oracle_attempts += 1;
        let attempt = record.oracle_attempts;
        self.store.save_run(record)?;

        let prior = prior_rules(&self.store.load_history(&record.dataset_id)?);
        let result = generate_with_timeout(
            self.oracle.as_ref(),
            &profile,
            &prior,
            self.config.oracle_timeout(),
        )
        .await;
        let (rules, origin) = match result {
            Ok(candidates) => {
                tracing::info!(
                    event = "oracle_answered",
                    run_id = %record.run_id,
                    oracle = self.oracle.name(),
                    attempt,
                    candidates = candidates.len()
                );
                (self.accept_candidates(record, &profile, candidates), RuleOrigin::Oracle)
            }
            Err(err) => {
                tracing::warn!(
                    event = "oracle_failed",
                    run_id = %record.run_id,
                    oracle = self.oracle.name(),
                    attempt,
                    error = %err
                );
                record
                    .warnings
                    .push(format!("oracle attempt {attempt} failed: {err}"));
                if attempt < self.config.oracle_max_attempts {
                    return self.advance(record, RunState::PendingRetry, Some(err.to_string()));
                }
                record.warnings.push(format!(
                    "oracle unavailable after {attempt} attempt(s); using fallback rules"
                ));
                (
                    fallback_rules(&profile, &self.config.fallback_rule_set),
                    RuleOrigin::Fallback,
                )
            }
        };

        record.rule_origin = Some(origin);
        let review = PendingReview::new(
            record.run_id.clone(),
            record.dataset_id.clone(),
            profile.summary(),
            rules,
        );
        let review = self.store.create_review(&review)?;
        tracing::info!(
            event = "review_created",
            run_id = %record.run_id,
            origin = origin.as_str(),
            rules = review.rule_set.len()
        );
        self.advance(record, RunState::AwaitingApproval, None)
    }

    /// Keep valid oracle candidates and add PII transforms for uncovered findings.
    fn accept_candidates(
        &self,
        record: &mut RunRecord,
        profile: &DataProfile,
        candidates: Vec<Rule>,
    ) -> Vec<Rule> {
        let columns = record
            .handle
            .as_ref()
            .map(|handle| handle.schema.clone())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(candidates.len());

        for rule in candidates {
            let rule = normalize_rule(rule);
            let report = validate_rule_set(std::slice::from_ref(&rule), &columns);
            let problem = if !seen.insert(rule.id.clone()) {
                Some("duplicate rule id".to_string())
            } else {
                report.errors.first().map(|issue| issue.message.clone())
            };
            match problem {
                Some(problem) => {
                    tracing::warn!(
                        event = "oracle_rule_dropped",
                        run_id = %record.run_id,
                        rule_id = %rule.id,
                        reason = %problem
                    );
                    record
                        .warnings
                        .push(format!("dropped oracle rule {}: {problem}", rule.id));
                }
                None => accepted.push(rule),
            }
        }

        let pii = derive_pii_rules(&profile.pii_findings, &accepted);
        accepted.extend(pii);
        accepted
    }

    /// Returns `false` while the review is undecided.
    fn check_approval(&self, record: &mut RunRecord) -> WorkflowResult<bool> {
        let Some(review) = self.store.load_review(&record.run_id)? else {
            tracing::warn!(event = "review_missing", run_id = %record.run_id);
            self.advance(record, RunState::Generating, Some("review missing".to_string()))?;
            return Ok(true);
        };

        match review.decision {
            None => Ok(false),
            Some(Decision::Rejected) => {
                let rejected = review.rule_set.into_iter().map(Rule::rejected).collect();
                self.fail(record, FailureRecord::rejected(rejected))?;
                Ok(true)
            }
            Some(decision) => {
                if decision == Decision::Edited {
                    record.rule_origin = Some(RuleOrigin::Reviewer);
                }
                self.advance(
                    record,
                    RunState::Applying,
                    Some(decision.as_str().to_string()),
                )?;
                Ok(true)
            }
        }
    }

    async fn apply(&self, record: &mut RunRecord) -> WorkflowResult<()> {
        if let Some(outputs) = self.layout.existing(&record.dataset_id, &record.run_id) {
            record.metrics = read_metrics(&outputs.metrics);
            record.outputs = Some(outputs);
            return self.advance(
                record,
                RunState::Completed,
                Some("outputs already published".to_string()),
            );
        }

        let handle = record.handle.clone().ok_or_else(|| self.invalid(record, "apply"))?;
        let review = self
            .store
            .load_review(&record.run_id)?
            .ok_or_else(|| StoreError::NotFound {
                kind: "review",
                id: record.run_id.clone(),
            })?;
        let mut rules = review
            .active_rules()
            .ok_or_else(|| self.invalid(record, "apply"))?;
        // Flagged columns are masked even if an edit dropped their transform.
        let pii = derive_pii_rules(&review.profile_summary.pii_findings, &rules);
        rules.extend(pii.into_iter().map(Rule::approved));

        let ctx = ApplyContext {
            run_id: record.run_id.clone(),
            dataset_id: record.dataset_id.clone(),
            rule_origin: record.rule_origin.unwrap_or(RuleOrigin::Fallback),
            warnings: record.warnings.clone(),
        };
        let engine = ApplyEngine::new(self.config.apply_options());
        let layout = self.layout.clone();

        let result = blocking(move || -> Result<ApplyOutcome, ApplyFailure> {
            let batch = reload_dataset(&handle).map_err(ApplyFailure::Input)?;
            engine
                .run(&ctx, &batch, &rules, &layout)
                .map_err(ApplyFailure::Apply)
        })
        .await?;

        match result {
            Ok(outcome) => {
                record.outputs = Some(outcome.outputs);
                record.metrics = Some(outcome.metrics);
                self.advance(record, RunState::Completed, None)
            }
            Err(ApplyFailure::Input(err)) => self.fail(
                record,
                FailureRecord::new(Stage::Applying, FailureKind::InputError, err.to_string()),
            ),
            Err(ApplyFailure::Apply(ApplyError::Publish(err))) => self.fail(
                record,
                FailureRecord::new(Stage::Applying, FailureKind::PersistenceError, err.to_string()),
            ),
            Err(ApplyFailure::Apply(err)) => self.fail(
                record,
                FailureRecord::new(Stage::Applying, FailureKind::Internal, err.to_string()),
            ),
        }
    }

    async fn reprofile(&self, record: &RunRecord) -> WorkflowResult<Result<DataProfile, InputError>> {
        let handle = record
            .handle
            .clone()
            .ok_or_else(|| self.invalid(record, "generate"))?;
        let options = self.config.profile_options();
        let detector = Arc::clone(&self.detector);
        blocking(move || {
            reload_dataset(&handle)
                .map(|batch| profile_batch(&handle, &batch, &options, detector.as_ref()))
        })
        .await
    }

    fn advance(&self, record: &mut RunRecord, to: RunState, note: Option<String>) -> WorkflowResult<()> {
        tracing::info!(
            event = "state_transition",
            run_id = %record.run_id,
            from = %record.state,
            to = %to
        );
        record.transition(to, note);
        self.store.save_run(record)?;
        Ok(())
    }

    fn fail(&self, record: &mut RunRecord, failure: FailureRecord) -> WorkflowResult<()> {
        tracing::error!(
            event = "run_failed",
            run_id = %record.run_id,
            stage = %failure.stage,
            reason = %failure.reason
        );
        record.fail(failure);
        self.store.save_run(record)?;
        Ok(())
    }

    fn invalid(&self, record: &RunRecord, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidState {
            run_id: record.run_id.clone(),
            state: record.state.to_string(),
            action,
        }
    }
}

fn read_metrics(path: &Path) -> Option<RunMetrics> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn blocking<F, T>(task: F) -> WorkflowResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| WorkflowError::Task(err.to_string()))
}
