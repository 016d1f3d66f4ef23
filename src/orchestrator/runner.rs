//! The top-level orchestration loop.
//!
//! Each cycle resolves the eligible frontier from a fresh snapshot, groups it
//! into batches and runs the batches one after another. A batch is claimed in
//! a single locked update before dispatch, its tasks run their review cycles
//! concurrently behind a semaphore, and the terminal statuses are committed
//! only after the whole batch has finished.
//!
//! A busy lock never aborts the run. An unclaimed batch ends the cycle, and
//! a frontier that is still unchanged after that ends the run. Outcomes that
//! cannot be committed stay pending and are retried on the next flush.

use crate::dag::{Batch, DependencyResolver, GroupCandidate, ParallelGrouper, TaskKey};
use crate::errors::StoreError;
use crate::orchestrator::events::RunEvent;
use crate::orchestrator::report::{ExecutionTimer, RunReport, TaskResult};
use crate::plan::{PlanDefinition, PlanReader};
use crate::progress::{ProgressIndex, ProgressStore, TaskOutcome, TaskStatus};
use crate::review::ReviewCycleController;
use crate::worker::TaskAssignment;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

/// Default size of the worker pool.
pub const DEFAULT_MAX_PARALLEL: usize = 4;
/// Default number of batches one run may dispatch.
pub const DEFAULT_MAX_STEPS: u32 = 100;

/// Configuration for the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Review cycles running at the same time.
    pub max_parallel: usize,
    /// Batches dispatched before the run stops.
    pub max_steps: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }
}

/// A terminal outcome waiting to be written to the index.
#[derive(Debug, Clone)]
struct PendingCommit {
    key: TaskKey,
    outcome: TaskOutcome,
}

/// Drives eligible tasks to terminal states.
pub struct Orchestrator {
    store: Arc<ProgressStore>,
    reader: Arc<PlanReader>,
    controller: Arc<ReviewCycleController>,
    resolver: DependencyResolver,
    grouper: ParallelGrouper,
    config: OrchestratorConfig,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(store: ProgressStore, reader: PlanReader, controller: ReviewCycleController) -> Self {
        Self {
            store: Arc::new(store),
            reader: Arc::new(reader),
            controller: Arc::new(controller),
            resolver: DependencyResolver::new(),
            grouper: ParallelGrouper::new(),
            config: OrchestratorConfig::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event channel for progress updates. The receiver must be drained.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    /// Run until no eligible task remains or the step budget is spent.
    pub async fn run(&self) -> Result<RunReport> {
        let timer = ExecutionTimer::start();
        let mut report = RunReport::default();
        let mut pending: Vec<PendingCommit> = Vec::new();
        let mut skipped_plans: BTreeSet<String> = BTreeSet::new();
        let mut batch_number = 0u32;
        // Frontier of the last cycle whose claim hit a busy lock.
        let mut contended: Option<Vec<TaskKey>> = None;

        'run: loop {
            self.flush(&mut pending, &mut report).await;

            let index = self.load().await?;
            let resolution = self.resolver.resolve(&index);
            for warning in &resolution.warnings {
                report.add_warning(warning.to_string());
            }

            let mut plans: HashMap<String, Arc<PlanDefinition>> = HashMap::new();
            let eligible = self.schedulable(
                resolution.eligible,
                &mut plans,
                &mut skipped_plans,
                &mut report,
            );
            if eligible.is_empty() {
                debug!("no eligible tasks left");
                break;
            }
            if contended.as_ref() == Some(&eligible) {
                warn!(
                    eligible = eligible.len(),
                    "frontier unchanged since the lock was last busy; stopping"
                );
                report.add_warning(format!(
                    "run stopped: progress index stayed locked with {} eligible task(s) unclaimed",
                    eligible.len()
                ));
                break;
            }
            contended = None;

            let candidates = GroupCandidate::from_index(&index, &eligible);
            let batches = self.grouper.group(&candidates);
            info!(
                eligible = eligible.len(),
                batches = batches.len(),
                "frontier grouped"
            );

            for batch in batches {
                if report.steps >= self.config.max_steps {
                    warn!(max_steps = self.config.max_steps, "step budget exhausted");
                    report.step_budget_exhausted = true;
                    report.add_warning(format!(
                        "step budget of {} batches exhausted",
                        self.config.max_steps
                    ));
                    break 'run;
                }
                report.steps += 1;
                batch_number += 1;

                let claimed = match self.claim(&batch).await {
                    Ok(claimed) => claimed,
                    Err(e) if e.is_lock_timeout() => {
                        warn!(batch = batch_number, error = %e, "could not claim batch");
                        report.add_warning(format!("batch {} not claimed: {}", batch_number, e));
                        contended = Some(eligible);
                        continue 'run;
                    }
                    Err(e) => return Err(e).context("Failed to claim batch"),
                };
                if claimed.is_empty() {
                    debug!(batch = batch_number, "batch already claimed elsewhere");
                    continue;
                }

                info!(batch = batch_number, tasks = claimed.len(), "batch started");
                self.emit(RunEvent::BatchStarted {
                    batch: batch_number,
                    tasks: claimed.iter().map(TaskKey::qualified).collect(),
                })
                .await;

                let results = self.dispatch(batch_number, &index, &plans, claimed).await;

                let (mut completed, mut with_issues, mut failed) = (0, 0, 0);
                for (result, outcome) in results {
                    match result.status {
                        TaskStatus::Completed => completed += 1,
                        TaskStatus::CompletedWithIssues => with_issues += 1,
                        _ => failed += 1,
                    }
                    self.emit(RunEvent::TaskFinished {
                        batch: batch_number,
                        task: result.task.qualified(),
                        status: result.status,
                        review_iterations: result.review_iterations,
                    })
                    .await;
                    pending.push(PendingCommit {
                        key: result.task.clone(),
                        outcome,
                    });
                    report.add_result(result);
                }

                self.flush(&mut pending, &mut report).await;
                self.emit(RunEvent::BatchCompleted {
                    batch: batch_number,
                    completed,
                    completed_with_issues: with_issues,
                    failed,
                })
                .await;
            }
        }

        self.flush(&mut pending, &mut report).await;
        for commit in pending.drain(..) {
            warn!(task = %commit.key, "outcome was never committed");
            report.add_warning(format!(
                "{}: {} outcome could not be committed",
                commit.key, commit.outcome.status
            ));
        }

        let index = self.load().await?;
        report.tally(&index);
        report.duration = timer.elapsed();

        info!(
            completed = report.completed.len(),
            completed_with_issues = report.completed_with_issues.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            steps = report.steps,
            "run finished"
        );
        self.emit(RunEvent::RunCompleted {
            completed: report.completed.len(),
            completed_with_issues: report.completed_with_issues.len(),
            failed: report.failed.len(),
            blocked: report.blocked.len(),
        })
        .await;

        Ok(report)
    }

    /// Drop tasks whose plan file cannot be read or whose definition is unusable.
    fn schedulable(
        &self,
        eligible: Vec<TaskKey>,
        plans: &mut HashMap<String, Arc<PlanDefinition>>,
        skipped_plans: &mut BTreeSet<String>,
        report: &mut RunReport,
    ) -> Vec<TaskKey> {
        eligible
            .into_iter()
            .filter(|key| {
                if skipped_plans.contains(&key.plan) {
                    return false;
                }
                let plan = match plans.get(&key.plan) {
                    Some(plan) => Arc::clone(plan),
                    None => match self.reader.read_plan(&key.plan) {
                        Ok(plan) => {
                            plans.insert(key.plan.clone(), Arc::clone(&plan));
                            plan
                        }
                        Err(e) => {
                            warn!(plan = %key.plan, error = %e, "skipping plan");
                            report.add_warning(format!("plan {} skipped: {}", key.plan, e));
                            skipped_plans.insert(key.plan.clone());
                            return false;
                        }
                    },
                };
                match plan.task(&key.task) {
                    Some(definition) if !definition.schedulable => {
                        report.add_warning(format!(
                            "{} is not schedulable: {}",
                            key,
                            definition.issues.join("; ")
                        ));
                        false
                    }
                    _ => true,
                }
            })
            .collect()
    }

    /// Move every still-`NotStarted` task of the batch to `InProgress` in one update.
    async fn claim(&self, batch: &Batch) -> Result<Vec<TaskKey>, StoreError> {
        let keys = batch.tasks.clone();
        self.with_store(move |store| {
            store.with_lock(move |index| {
                let mut claimed = Vec::new();
                for key in keys {
                    let available = index
                        .task(&key)
                        .is_some_and(|t| t.status == TaskStatus::NotStarted);
                    if available {
                        index.transition_task(&key, TaskStatus::InProgress)?;
                        claimed.push(key);
                    }
                }
                Ok(claimed)
            })
        })
        .await
    }

    /// Run the review cycles of a claimed batch and wait for all of them.
    async fn dispatch(
        &self,
        batch: u32,
        index: &ProgressIndex,
        plans: &HashMap<String, Arc<PlanDefinition>>,
        claimed: Vec<TaskKey>,
    ) -> Vec<(TaskResult, TaskOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

        let (keys, handles): (Vec<_>, Vec<_>) = claimed
            .into_iter()
            .map(|key| {
                let assignment =
                    Self::assignment(&key, index, plans.get(&key.plan).map(Arc::as_ref));
                let semaphore = Arc::clone(&semaphore);
                let controller = Arc::clone(&self.controller);
                let event_tx = self.event_tx.clone();
                let task_key = key.clone();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    if let Some(tx) = &event_tx {
                        tx.send(RunEvent::TaskStarted {
                            batch,
                            task: task_key.qualified(),
                        })
                        .await
                        .ok();
                    }
                    let timer = ExecutionTimer::start();
                    let cycle = controller.run(&assignment).await;
                    let result = TaskResult::from_cycle(task_key, &cycle, timer.elapsed());
                    (result, cycle.to_outcome())
                });
                (key, handle)
            })
            .unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(keys)
            .map(|(joined, key)| match joined {
                Ok(pair) => pair,
                Err(e) => {
                    let reason = format!("review cycle aborted: {}", e);
                    warn!(task = %key, %reason, "task did not finish");
                    let outcome = TaskOutcome {
                        status: TaskStatus::Failed,
                        iterations: 0,
                        findings: Vec::new(),
                        failure_reason: Some(reason.clone()),
                    };
                    (TaskResult::aborted(key, reason, Duration::ZERO), outcome)
                }
            })
            .collect()
    }

    fn assignment(
        key: &TaskKey,
        index: &ProgressIndex,
        plan: Option<&PlanDefinition>,
    ) -> TaskAssignment {
        let mut assignment = TaskAssignment::new(key);
        if let Some(record) = index.task(key) {
            assignment = assignment.with_deliverables(record.deliverables.clone());
        }
        if let Some(definition) = plan.and_then(|p| p.task(&key.task)) {
            assignment = assignment
                .with_title(definition.title.clone())
                .with_completion_criteria(
                    definition.criteria.iter().map(|c| c.text.clone()).collect(),
                );
            if assignment.deliverables.is_empty() {
                assignment.deliverables = definition.deliverables.clone();
            }
        }
        assignment
    }

    /// Commit pending outcomes. Lock contention leaves them pending for the next try.
    async fn flush(&self, pending: &mut Vec<PendingCommit>, report: &mut RunReport) {
        if pending.is_empty() {
            return;
        }

        let commits = pending.clone();
        let result = self
            .with_store(move |store| {
                store.with_lock(move |index| {
                    let mut rejected = Vec::new();
                    for commit in commits {
                        if let Err(e) = index.record_outcome(&commit.key, commit.outcome) {
                            rejected.push((commit.key, e.to_string()));
                        }
                    }
                    Ok(rejected)
                })
            })
            .await;

        match result {
            Ok(rejected) => {
                debug!(
                    committed = pending.len() - rejected.len(),
                    "outcomes committed"
                );
                pending.clear();
                for (key, reason) in rejected {
                    warn!(task = %key, %reason, "commit rejected");
                    report.add_warning(format!("{}: commit rejected: {}", key, reason));
                }
            }
            Err(e) if e.is_lock_timeout() => {
                warn!(pending = pending.len(), "progress index busy; commit deferred");
            }
            Err(e) => {
                warn!(pending = pending.len(), error = %e, "commit failed; will retry");
            }
        }
    }

    async fn load(&self) -> Result<ProgressIndex> {
        self.with_store(|store| store.load())
            .await
            .context("Failed to load progress index")
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ProgressStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Other(anyhow::anyhow!("store task failed: {}", e)))?
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}
