//! Per-task implement → verify → review loop.
//!
//! ```text
//! Implement -> Verify --fail--> Implement (fix attempt, bounded) --exhausted--> Failed
//!                |
//!                +--ok--> Review(n) --approved--> Completed
//!                            |
//!                            +--changes requested, n < 3--> Implement(fix) -> Verify -> Review(n+1)
//!                            +--changes requested, n = 3--> CompletedWithIssues
//! ```

use crate::progress::{TaskOutcome, TaskStatus};
use crate::review::findings::{FindingSeverity, ReviewFinding, ReviewOutcome};
use crate::review::policy::ReviewIteration;
use crate::worker::{TaskAssignment, WorkOutcome, WorkRequest, WorkerRole, WorkerSet};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Default number of fix attempts per implement/verify stage.
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 2;

/// Terminal result of one review cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub status: TaskStatus,
    /// Review iterations that ran (0 when the task never reached review).
    pub review_iterations: u32,
    /// Fix attempts consumed across every implement/verify stage.
    pub fix_attempts: u32,
    /// Unresolved findings (`CompletedWithIssues`) or the last failure's findings.
    pub findings: Vec<ReviewFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub history: Vec<ReviewOutcome>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            status: TaskStatus::InProgress,
            review_iterations: 0,
            fix_attempts: 0,
            findings: Vec::new(),
            failure_reason: None,
            history: Vec::new(),
        }
    }

    fn fail(mut self, reason: String, findings: Vec<ReviewFinding>) -> Self {
        self.status = TaskStatus::Failed;
        self.failure_reason = Some(reason);
        self.findings = findings;
        self
    }

    /// The record folded into the progress index.
    pub fn to_outcome(&self) -> TaskOutcome {
        TaskOutcome {
            status: self.status,
            iterations: self.review_iterations,
            findings: self.findings.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// How an implement/verify stage ended.
enum StageResult {
    Verified,
    Exhausted {
        reason: String,
        findings: Vec<ReviewFinding>,
    },
    WorkerError(String),
}

/// Drives one task through its review cycle.
#[derive(Debug, Clone)]
pub struct ReviewCycleController {
    workers: WorkerSet,
    max_fix_attempts: u32,
}

impl ReviewCycleController {
    pub fn new(workers: WorkerSet) -> Self {
        Self {
            workers,
            max_fix_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
        }
    }

    pub fn with_max_fix_attempts(mut self, attempts: u32) -> Self {
        self.max_fix_attempts = attempts;
        self
    }

    pub fn max_fix_attempts(&self) -> u32 {
        self.max_fix_attempts
    }

    /// Run the full cycle for one task. Always ends in a terminal status.
    pub async fn run(&self, assignment: &TaskAssignment) -> CycleReport {
        let key = assignment.key();
        let mut report = CycleReport::new();
        let mut iteration = ReviewIteration::First;
        let mut carried: Vec<ReviewFinding> = Vec::new();

        loop {
            let to_fix: Vec<ReviewFinding> = carried
                .iter()
                .filter(|f| f.is_actionable())
                .cloned()
                .collect();

            match self
                .implement_and_verify(assignment, &mut report, iteration.number() - 1, to_fix)
                .await
            {
                StageResult::Verified => {}
                StageResult::Exhausted { reason, findings } => {
                    warn!(task = %key, %reason, "fix attempts exhausted");
                    return report.fail(reason, findings);
                }
                StageResult::WorkerError(reason) => {
                    warn!(task = %key, %reason, "worker error");
                    return report.fail(reason, Vec::new());
                }
            }

            let strictness = iteration.strictness();
            let request = WorkRequest::new(WorkerRole::Reviewer, assignment.clone())
                .with_review_iteration(iteration.number())
                .with_strictness(strictness)
                .with_findings(carried.clone());

            let reported = match self.workers.execute(&request).await {
                Ok(outcome) => Self::reviewer_findings(outcome),
                Err(e) => {
                    let reason = format!("reviewer error: {:#}", e);
                    warn!(task = %key, %reason, "worker error");
                    return report.fail(reason, Vec::new());
                }
            };

            let review =
                ReviewOutcome::from_findings(iteration.number(), strictness.filter(&carried, reported));
            report.review_iterations = iteration.number();
            info!(
                task = %key,
                iteration = iteration.number(),
                verdict = %review.verdict,
                findings = review.findings.len(),
                "review finished"
            );
            report.history.push(review.clone());

            if review.verdict.is_approved() {
                report.status = TaskStatus::Completed;
                return report;
            }

            match iteration.next() {
                Some(next) => {
                    carried = review.findings;
                    iteration = next;
                }
                None => {
                    report.status = TaskStatus::CompletedWithIssues;
                    report.findings = review.findings;
                    return report;
                }
            }
        }
    }

    /// A reviewer that reports failure without saying why still requests changes.
    fn reviewer_findings(outcome: WorkOutcome) -> Vec<ReviewFinding> {
        if !outcome.success && outcome.findings.is_empty() {
            return vec![
                ReviewFinding::new(
                    FindingSeverity::Warning,
                    "reviewer rejected the change without findings",
                )
                .as_regression(),
            ];
        }
        outcome.findings
    }

    async fn implement_and_verify(
        &self,
        assignment: &TaskAssignment,
        report: &mut CycleReport,
        review_iteration: u32,
        mut findings: Vec<ReviewFinding>,
    ) -> StageResult {
        let key = assignment.key();
        let attempts = self.max_fix_attempts.saturating_add(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                report.fix_attempts += 1;
            }

            let implement = WorkRequest::new(WorkerRole::Implementer, assignment.clone())
                .with_attempt(attempt)
                .with_review_iteration(review_iteration)
                .with_findings(findings.clone());
            let implemented = match self.workers.execute(&implement).await {
                Ok(outcome) => outcome,
                Err(e) => return StageResult::WorkerError(format!("implementer error: {:#}", e)),
            };
            if !implemented.success {
                debug!(task = %key, attempt, "implementer reported failure");
                findings = implemented.findings;
                if attempt == attempts {
                    return Self::exhausted("implementation", attempts, findings);
                }
                continue;
            }

            let verify = WorkRequest::new(WorkerRole::Verifier, assignment.clone())
                .with_attempt(attempt)
                .with_review_iteration(review_iteration);
            let verified = match self.workers.execute(&verify).await {
                Ok(outcome) => outcome,
                Err(e) => return StageResult::WorkerError(format!("verifier error: {:#}", e)),
            };
            if verified.success {
                debug!(task = %key, attempt, "verification passed");
                return StageResult::Verified;
            }

            debug!(task = %key, attempt, "verification failed");
            findings = verified.findings;
            if attempt == attempts {
                return Self::exhausted("verification", attempts, findings);
            }
        }

        // Unreachable with attempts >= 1; treated as exhaustion.
        Self::exhausted("verification", attempts, findings)
    }

    fn exhausted(stage: &str, attempts: u32, findings: Vec<ReviewFinding>) -> StageResult {
        let detail = findings
            .first()
            .map(|f| format!(": {}", f.description()))
            .unwrap_or_default();
        StageResult::Exhausted {
            reason: format!("{} failed after {} attempt(s){}", stage, attempts, detail),
            findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskKey;
    use crate::worker::ExecutionWorker;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted outcomes and records every request it sees.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<WorkOutcome, String>>>,
        fallback: bool,
        seen: Mutex<Vec<WorkRequest>>,
    }

    impl Scripted {
        fn always(success: bool) -> Arc<Self> {
            Arc::new(Self {
                fallback: success,
                ..Default::default()
            })
        }

        fn script(outcomes: Vec<Result<WorkOutcome, String>>, fallback: bool) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                fallback,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExecutionWorker for Scripted {
        async fn execute(&self, request: &WorkRequest) -> Result<WorkOutcome> {
            self.seen.lock().unwrap().push(request.clone());
            match self.outcomes.lock().unwrap().pop_front() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(e)) => bail!(e),
                None => Ok(WorkOutcome {
                    success: self.fallback,
                    findings: Vec::new(),
                }),
            }
        }
    }

    fn finding(severity: FindingSeverity, text: &str) -> ReviewFinding {
        ReviewFinding::new(severity, text)
    }

    fn changes(findings: Vec<ReviewFinding>) -> Result<WorkOutcome, String> {
        Ok(WorkOutcome::failure(findings))
    }

    fn assignment() -> TaskAssignment {
        TaskAssignment::new(&TaskKey::new("p1", "TASK-5"))
    }

    fn controller(
        implementer: Arc<Scripted>,
        verifier: Arc<Scripted>,
        reviewer: Arc<Scripted>,
    ) -> ReviewCycleController {
        ReviewCycleController::new(WorkerSet::new(implementer, verifier, reviewer))
    }

    #[tokio::test]
    async fn test_happy_path_completes_in_one_iteration() {
        let reviewer = Scripted::always(true);
        let report = controller(
            Scripted::always(true),
            Scripted::always(true),
            reviewer.clone(),
        )
        .run(&assignment())
        .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.review_iterations, 1);
        assert_eq!(report.fix_attempts, 0);
        assert_eq!(reviewer.calls(), 1);
    }

    #[tokio::test]
    async fn test_fix_then_approve() {
        let implementer = Scripted::always(true);
        let reviewer = Scripted::script(
            vec![changes(vec![finding(FindingSeverity::Warning, "missing test")])],
            true,
        );
        let report = controller(implementer.clone(), Scripted::always(true), reviewer)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.review_iterations, 2);
        assert_eq!(report.history.len(), 2);

        // The second implementer call carries the review finding.
        let seen = implementer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].findings[0].description(), "missing test");
        assert_eq!(seen[1].review_iteration, 1);
    }

    #[tokio::test]
    async fn test_never_approved_ends_with_issues() {
        let critical = finding(FindingSeverity::Critical, "unsafe unwrap");
        let reviewer = Scripted::script(
            vec![
                changes(vec![critical.clone()]),
                changes(vec![critical.clone()]),
                changes(vec![critical.clone()]),
            ],
            true,
        );
        let report = controller(
            Scripted::always(true),
            Scripted::always(true),
            reviewer.clone(),
        )
        .run(&assignment())
        .await;

        assert_eq!(report.status, TaskStatus::CompletedWithIssues);
        assert_eq!(report.review_iterations, 3);
        assert_eq!(report.findings, vec![critical]);
        assert_eq!(reviewer.calls(), 3);
    }

    #[tokio::test]
    async fn test_new_findings_after_first_iteration_are_ignored() {
        let reviewer = Scripted::script(
            vec![
                changes(vec![finding(FindingSeverity::Warning, "naming")]),
                changes(vec![finding(FindingSeverity::Warning, "brand new nit")]),
            ],
            true,
        );
        let report = controller(Scripted::always(true), Scripted::always(true), reviewer)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.review_iterations, 2);
    }

    #[tokio::test]
    async fn test_third_iteration_only_checks_criticals() {
        let reviewer = Scripted::script(
            vec![
                changes(vec![
                    finding(FindingSeverity::Critical, "sql injection"),
                    finding(FindingSeverity::Warning, "slow loop"),
                ]),
                changes(vec![
                    finding(FindingSeverity::Critical, "sql injection"),
                    finding(FindingSeverity::Warning, "slow loop"),
                ]),
                changes(vec![finding(FindingSeverity::Warning, "slow loop")]),
            ],
            true,
        );
        let report = controller(Scripted::always(true), Scripted::always(true), reviewer)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.review_iterations, 3);
    }

    #[tokio::test]
    async fn test_verify_exhaustion_fails() {
        let verifier = Scripted::script(
            vec![
                changes(vec![finding(FindingSeverity::Critical, "tests fail")]),
                changes(vec![finding(FindingSeverity::Critical, "tests fail")]),
                changes(vec![finding(FindingSeverity::Critical, "still failing")]),
            ],
            true,
        );
        let reviewer = Scripted::always(true);
        let report = controller(Scripted::always(true), verifier.clone(), reviewer.clone())
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.fix_attempts, 2);
        assert_eq!(verifier.calls(), 3);
        assert_eq!(reviewer.calls(), 0);
        let reason = report.failure_reason.unwrap();
        assert!(reason.contains("verification failed after 3"));
        assert!(reason.contains("still failing"));
    }

    #[tokio::test]
    async fn test_verify_recovers_within_budget() {
        let verifier = Scripted::script(
            vec![changes(vec![finding(FindingSeverity::Critical, "tests fail")])],
            true,
        );
        let report = controller(Scripted::always(true), verifier, Scripted::always(true))
            .with_max_fix_attempts(1)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.fix_attempts, 1);
    }

    #[tokio::test]
    async fn test_unbounded_fix_budget_does_not_overflow() {
        let verifier = Scripted::script(
            vec![changes(vec![finding(FindingSeverity::Critical, "tests fail")])],
            true,
        );
        let report = controller(Scripted::always(true), verifier, Scripted::always(true))
            .with_max_fix_attempts(u32::MAX)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.fix_attempts, 1);
    }

    #[tokio::test]
    async fn test_fix_budget_resets_per_review_round() {
        // One failed verification before each of two reviews, budget of one.
        let verifier = Scripted::script(
            vec![
                changes(vec![finding(FindingSeverity::Critical, "flaky")]),
                Ok(WorkOutcome::success()),
                changes(vec![finding(FindingSeverity::Critical, "flaky")]),
            ],
            true,
        );
        let reviewer = Scripted::script(
            vec![changes(vec![finding(FindingSeverity::Warning, "naming")])],
            true,
        );
        let report = controller(Scripted::always(true), verifier, reviewer)
            .with_max_fix_attempts(1)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.fix_attempts, 2);
    }

    #[tokio::test]
    async fn test_worker_error_fails_task() {
        let implementer = Scripted::script(vec![Err("spawn failed".to_string())], true);
        let report = controller(implementer, Scripted::always(true), Scripted::always(true))
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.failure_reason.unwrap().contains("spawn failed"));
    }

    #[tokio::test]
    async fn test_bare_reviewer_rejection_requests_changes() {
        let reviewer = Scripted::script(vec![Ok(WorkOutcome::failure(Vec::new()))], true);
        let report = controller(Scripted::always(true), Scripted::always(true), reviewer)
            .run(&assignment())
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.review_iterations, 2);
        assert!(!report.history[0].verdict.is_approved());
    }

    #[test]
    fn test_report_to_outcome() {
        let report = CycleReport::new().fail("boom".to_string(), Vec::new());
        let outcome = report.to_outcome();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("boom"));
    }
}
