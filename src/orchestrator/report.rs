//! Run results and the final orchestration report.

use crate::dag::TaskKey;
use crate::progress::{ProgressIndex, TaskStatus};
use crate::review::{CycleReport, ReviewFinding};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Result of running one task's review cycle during this run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task: TaskKey,
    pub status: TaskStatus,
    pub review_iterations: u32,
    pub fix_attempts: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ReviewFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl TaskResult {
    pub fn from_cycle(task: TaskKey, cycle: &CycleReport, duration: Duration) -> Self {
        Self {
            task,
            status: cycle.status,
            review_iterations: cycle.review_iterations,
            fix_attempts: cycle.fix_attempts,
            findings: cycle.findings.clone(),
            failure_reason: cycle.failure_reason.clone(),
            duration,
        }
    }

    /// A task whose cycle never produced a report (the worker task panicked).
    pub fn aborted(task: TaskKey, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            task,
            status: TaskStatus::Failed,
            review_iterations: 0,
            fix_attempts: 0,
            findings: Vec::new(),
            failure_reason: Some(reason.into()),
            duration,
        }
    }
}

/// Final report of an orchestration run.
///
/// The four task lists cover every task in the index: each task is in exactly
/// one of them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub completed: Vec<TaskKey>,
    pub completed_with_issues: Vec<TaskKey>,
    pub failed: Vec<TaskKey>,
    /// Tasks still `NotStarted` or `InProgress` when the run ended.
    pub blocked: Vec<TaskKey>,
    /// Final status of every task, keyed `plan:TASK`.
    pub task_states: BTreeMap<String, TaskStatus>,
    /// Tasks executed during this run, in completion order.
    pub results: Vec<TaskResult>,
    /// Configuration, plan and commit problems met along the way.
    pub warnings: Vec<String>,
    /// Batches dispatched.
    pub steps: u32,
    pub step_budget_exhausted: bool,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunReport {
    /// Fill the task lists from the final index.
    pub fn tally(&mut self, index: &ProgressIndex) {
        self.completed.clear();
        self.completed_with_issues.clear();
        self.failed.clear();
        self.blocked.clear();
        self.task_states.clear();

        for key in index.task_keys() {
            let Some(task) = index.task(&key) else {
                continue;
            };
            self.task_states.insert(key.qualified(), task.status);
            match task.status {
                TaskStatus::Completed => self.completed.push(key),
                TaskStatus::CompletedWithIssues => self.completed_with_issues.push(key),
                TaskStatus::Failed => self.failed.push(key),
                TaskStatus::NotStarted | TaskStatus::InProgress => self.blocked.push(key),
            }
        }
    }

    pub fn add_result(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.task_states.len()
    }

    /// Every task ended `Completed`.
    pub fn all_success(&self) -> bool {
        self.completed.len() == self.total_tasks()
    }

    /// True when nothing failed; tasks completed with issues still count.
    pub fn no_failures(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serializes a Duration as whole milliseconds.
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{PlanRecord, TaskRecord};

    #[test]
    fn test_tally_buckets_every_task() {
        let mut index = ProgressIndex::new();
        index.insert_plan(
            PlanRecord::new("p1", 1)
                .with_task(TaskRecord::new("TASK-1").with_status(TaskStatus::Completed))
                .with_task(
                    TaskRecord::new("TASK-2").with_status(TaskStatus::CompletedWithIssues),
                )
                .with_task(TaskRecord::new("TASK-3").with_status(TaskStatus::Failed))
                .with_task(TaskRecord::new("TASK-4"))
                .with_task(TaskRecord::new("TASK-5").with_status(TaskStatus::InProgress)),
        );

        let mut report = RunReport::default();
        report.tally(&index);

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed_with_issues.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.blocked.len(), 2);
        assert_eq!(report.total_tasks(), 5);
        assert!(!report.all_success());
        assert!(!report.no_failures());
        assert_eq!(
            report.task_states.get("p1:TASK-2"),
            Some(&TaskStatus::CompletedWithIssues)
        );
    }

    #[test]
    fn test_warnings_are_deduplicated() {
        let mut report = RunReport::default();
        report.add_warning("plan ghost skipped");
        report.add_warning("plan ghost skipped");
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_report_serializes_duration_as_millis() {
        let report = RunReport {
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1500);
    }
}
