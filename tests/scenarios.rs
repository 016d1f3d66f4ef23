//! End-to-end scenarios against the library API.

use anyhow::Result;
use async_trait::async_trait;
use conductor::dag::{DependencyResolver, GroupCandidate, ParallelGrouper, ResolveWarning, TaskKey};
use conductor::orchestrator::{Orchestrator, OrchestratorConfig};
use conductor::plan::{PlanReader, parse_plan};
use conductor::progress::{PlanRecord, ProgressIndex, ProgressStore, TaskRecord, TaskStatus};
use conductor::review::{FindingSeverity, ReviewCycleController, ReviewFinding, ReviewVerdict};
use conductor::worker::{ExecutionWorker, TaskAssignment, WorkOutcome, WorkRequest, WorkerSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Always succeeds.
struct Pass;

#[async_trait]
impl ExecutionWorker for Pass {
    async fn execute(&self, _request: &WorkRequest) -> Result<WorkOutcome> {
        Ok(WorkOutcome::success())
    }
}

/// Reviewer that replays one findings list per call, approving once exhausted.
struct ScriptedReviewer {
    rounds: Mutex<VecDeque<Vec<ReviewFinding>>>,
}

impl ScriptedReviewer {
    fn new(rounds: Vec<Vec<ReviewFinding>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
        })
    }
}

#[async_trait]
impl ExecutionWorker for ScriptedReviewer {
    async fn execute(&self, _request: &WorkRequest) -> Result<WorkOutcome> {
        let findings = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
        if findings.is_empty() {
            Ok(WorkOutcome::success())
        } else {
            Ok(WorkOutcome::failure(findings))
        }
    }
}

/// Implementer that records how many calls overlap in time.
#[derive(Default)]
struct Overlap {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ExecutionWorker for Overlap {
    async fn execute(&self, _request: &WorkRequest) -> Result<WorkOutcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(WorkOutcome::success())
    }
}

fn critical(text: &str) -> ReviewFinding {
    ReviewFinding::new(FindingSeverity::Critical, text)
}

fn controller(reviewer: Arc<dyn ExecutionWorker>) -> ReviewCycleController {
    ReviewCycleController::new(WorkerSet::new(Arc::new(Pass), Arc::new(Pass), reviewer))
}

#[test]
fn scenario_a_frontier_advances_after_completion() {
    let mut index = ProgressIndex::new();
    index.insert_plan(
        PlanRecord::new("p1", 1)
            .with_task(TaskRecord::new("TASK-1").with_parallelizable(true))
            .with_task(TaskRecord::new("TASK-2").with_deps(["TASK-1"])),
    );

    let resolver = DependencyResolver::new();
    assert_eq!(
        resolver.resolve(&index).eligible,
        vec![TaskKey::new("p1", "TASK-1")]
    );

    let task1 = TaskKey::new("p1", "TASK-1");
    index.transition_task(&task1, TaskStatus::InProgress).unwrap();
    index.transition_task(&task1, TaskStatus::Completed).unwrap();
    index.refresh();

    assert_eq!(
        resolver.resolve(&index).eligible,
        vec![TaskKey::new("p1", "TASK-2")]
    );
}

#[test]
fn scenario_b_missing_cross_plan_dependency_warns() {
    let mut index = ProgressIndex::new();
    index.insert_plan(
        PlanRecord::new("p1", 1)
            .with_task(TaskRecord::new("TASK-1"))
            .with_task(TaskRecord::new("TASK-3").with_deps(["other-plan:TASK-9"])),
    );

    let resolution = DependencyResolver::new().resolve(&index);

    assert_eq!(resolution.eligible, vec![TaskKey::new("p1", "TASK-1")]);
    assert_eq!(resolution.warnings.len(), 1);
    assert!(matches!(
        &resolution.warnings[0],
        ResolveWarning::MissingPlan { task, plan }
            if task == &TaskKey::new("p1", "TASK-3") && plan == "other-plan"
    ));
}

#[tokio::test]
async fn scenario_c_approved_on_third_iteration() {
    let reviewer = ScriptedReviewer::new(vec![
        vec![critical("missing validation"), critical("unchecked unwrap")],
        vec![critical("missing validation")],
        vec![],
    ]);
    let assignment = TaskAssignment::new(&TaskKey::new("p1", "TASK-4"));

    let report = controller(reviewer).run(&assignment).await;

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.review_iterations, 3);
    let verdicts: Vec<ReviewVerdict> = report.history.iter().map(|r| r.verdict).collect();
    assert_eq!(
        verdicts,
        vec![
            ReviewVerdict::ChangesRequested,
            ReviewVerdict::ChangesRequested,
            ReviewVerdict::Approved
        ]
    );
    assert_eq!(report.history[0].findings.len(), 2);
    assert_eq!(report.history[1].findings.len(), 1);
}

#[tokio::test]
async fn scenario_d_never_approved_completes_with_issues() {
    let persistent = critical("race in session refresh").with_location("src/session.rs:42");
    let reviewer = ScriptedReviewer::new(vec![
        vec![persistent.clone()],
        vec![persistent.clone()],
        vec![persistent.clone()],
    ]);
    let assignment = TaskAssignment::new(&TaskKey::new("p1", "TASK-5"));

    let report = controller(reviewer).run(&assignment).await;

    assert_eq!(report.status, TaskStatus::CompletedWithIssues);
    assert_eq!(report.review_iterations, 3);
    assert_eq!(report.findings, vec![persistent]);
    assert_eq!(report.to_outcome().findings, report.findings);
}

#[tokio::test]
async fn scenario_e_independent_tasks_share_a_batch() {
    let dir = tempdir().unwrap();
    let plans = dir.path().join("plans");
    std::fs::create_dir_all(&plans).unwrap();
    let content = "### TASK-6: Left\n**Parallelizable**: yes\n**Deliverables**: src/left.rs\n\n\
                   ### TASK-7: Right\n**Parallelizable**: yes\n**Deliverables**: src/right.rs\n";
    std::fs::write(plans.join("p1.md"), content).unwrap();

    let store = ProgressStore::new(dir.path().join("progress.json"));
    let definition = parse_plan("p1", content);
    store
        .with_lock(|index| Ok(index.register_plan(&definition, 1)?))
        .unwrap();

    let index = store.load().unwrap();
    let eligible = DependencyResolver::new().resolve(&index).eligible;
    let batches = ParallelGrouper::new().group(&GroupCandidate::from_index(&index, &eligible));
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);

    let implementer = Arc::new(Overlap::default());
    let workers = WorkerSet::new(implementer.clone(), Arc::new(Pass), Arc::new(Pass));
    let orchestrator = Orchestrator::new(
        ProgressStore::new(dir.path().join("progress.json")),
        PlanReader::new(&plans),
        ReviewCycleController::new(workers),
    )
    .with_config(OrchestratorConfig::default().with_max_parallel(2));

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.steps, 1);
    assert_eq!(implementer.peak.load(Ordering::SeqCst), 2);

    let index = store.load().unwrap();
    for task in ["TASK-6", "TASK-7"] {
        assert_eq!(
            index.task(&TaskKey::new("p1", task)).unwrap().status,
            TaskStatus::Completed
        );
    }
}

#[test]
fn concurrent_writers_never_lose_updates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let writers = 6;

    let handles: Vec<_> = (0..writers)
        .map(|n| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = ProgressStore::new(path);
                store
                    .with_lock(|index| {
                        index.insert_plan(
                            PlanRecord::new(format!("plan-{}", n), 1)
                                .with_task(TaskRecord::new("TASK-1"))
                                .with_task(TaskRecord::new("TASK-2").with_deps(["TASK-1"])),
                        );
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let index = ProgressStore::new(&path).load().unwrap();
    assert_eq!(index.version, writers as u64);
    assert_eq!(index.plans().count(), writers);
    for plan in index.plans() {
        assert_eq!(plan.tasks.len(), 2, "plan {} was written partially", plan.id);
    }
}
