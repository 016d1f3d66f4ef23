//! The progress index aggregate: phases, plans and tasks.
//!
//! Plans and tasks are value objects reachable only through [`ProgressIndex`].
//! Plan and phase statuses are derived from task statuses and refreshed after
//! every mutation.

use crate::dag::TaskKey;
use crate::errors::IndexError;
use crate::plan::PlanDefinition;
use crate::review::findings::ReviewFinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Status of a single task. Moves forward only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    CompletedWithIssues,
    Failed,
}

impl TaskStatus {
    /// Check if the task reached one of its three terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithIssues | Self::Failed
        )
    }

    /// Check whether moving to `next` is a legal forward step.
    ///
    /// # Examples
    ///
    /// ```
    /// use conductor::progress::TaskStatus;
    ///
    /// assert!(TaskStatus::NotStarted.can_transition_to(TaskStatus::InProgress));
    /// assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::CompletedWithIssues));
    /// assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::NotStarted));
    /// assert!(!TaskStatus::NotStarted.can_transition_to(TaskStatus::Completed));
    /// ```
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::InProgress)
                | (
                    Self::InProgress,
                    Self::Completed | Self::CompletedWithIssues | Self::Failed
                )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::CompletedWithIssues => "CompletedWithIssues",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Status of a plan, derived from its tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    #[default]
    Planning,
    Ready,
    InProgress,
    Completed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planning => "Planning",
            Self::Ready => "Ready",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
        };
        write!(f, "{}", s)
    }
}

/// Status of a phase, derived from its plans and upstream phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseStatus {
    Completed,
    Ready,
    #[default]
    Blocked,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "Completed",
            Self::Ready => "Ready",
            Self::Blocked => "Blocked",
        };
        write!(f, "{}", s)
    }
}

/// Whether `CompletedWithIssues` settles a plan for phase readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuesPolicy {
    /// Tasks completed with issues count as done for plan and phase completion.
    #[default]
    Accept,
    /// Tasks completed with issues keep their plan open and block later phases.
    Block,
}

impl IssuesPolicy {
    /// Whether a task in `status` counts as done for plan and phase derivation.
    pub fn settles(self, status: TaskStatus) -> bool {
        match status {
            TaskStatus::Completed => true,
            TaskStatus::CompletedWithIssues => self == Self::Accept,
            _ => false,
        }
    }
}

impl fmt::Display for IssuesPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for IssuesPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "block" => Ok(Self::Block),
            _ => anyhow::bail!("Invalid issues policy '{}'. Valid values: accept, block", s),
        }
    }
}

/// Checked/total counts of a task's completion-criteria checklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaProgress {
    pub checked: u32,
    pub total: u32,
}

/// A task as tracked in the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub parallelizable: bool,
    /// Raw dependency references, parsed by the resolver.
    pub deps: Vec<String>,
    pub deliverables: Vec<String>,
    pub criteria: Option<CriteriaProgress>,
    /// Review iterations used by the last review cycle.
    pub iterations: u32,
    /// Unresolved findings kept for `CompletedWithIssues`.
    pub findings: Vec<ReviewFinding>,
    pub failure_reason: Option<String>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parallelizable(mut self, parallelizable: bool) -> Self {
        self.parallelizable = parallelizable;
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deliverables<I, S>(mut self, deliverables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deliverables = deliverables.into_iter().map(Into::into).collect();
        self
    }
}

/// A plan as tracked in the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanRecord {
    pub id: String,
    pub phase: u32,
    pub status: PlanStatus,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl PlanRecord {
    pub fn new(id: impl Into<String>, phase: u32) -> Self {
        Self {
            id: id.into(),
            phase,
            status: PlanStatus::Planning,
            tasks: BTreeMap::new(),
        }
    }

    pub fn with_task(mut self, task: TaskRecord) -> Self {
        self.tasks.insert(task.id.clone(), task);
        self
    }

    fn derive_status(&self, policy: IssuesPolicy) -> PlanStatus {
        // Archived plans stay archived.
        if self.status == PlanStatus::Completed {
            return PlanStatus::Completed;
        }
        if self.tasks.is_empty() {
            return PlanStatus::Planning;
        }
        if self.tasks.values().all(|t| policy.settles(t.status)) {
            PlanStatus::Completed
        } else if self
            .tasks
            .values()
            .all(|t| t.status == TaskStatus::NotStarted)
        {
            PlanStatus::Ready
        } else {
            PlanStatus::InProgress
        }
    }
}

/// A phase entry. Its status is recomputed, never set directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseRecord {
    pub index: u32,
    pub status: PhaseStatus,
    /// Explicit upstream phases; `None` means every lower-indexed phase.
    pub depends_on: Option<Vec<u32>>,
}

/// Terminal result of a review cycle, folded into a task record.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub iterations: u32,
    pub findings: Vec<ReviewFinding>,
    pub failure_reason: Option<String>,
}

/// What changed when a plan definition was registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisterSummary {
    pub plan: String,
    pub created: bool,
    pub added: Vec<String>,
    pub updated: Vec<String>,
}

/// Aggregate root for all progress state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressIndex {
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub(crate) phases: BTreeMap<u32, PhaseRecord>,
    pub(crate) plans: BTreeMap<String, PlanRecord>,
    pub(crate) policy: IssuesPolicy,
}

impl ProgressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the issues policy used for derived statuses.
    pub fn with_policy(mut self, policy: IssuesPolicy) -> Self {
        self.policy = policy;
        self.refresh();
        self
    }

    pub fn policy(&self) -> IssuesPolicy {
        self.policy
    }

    /// Insert a plan record as-is. Used by loaders and tests.
    pub fn insert_plan(&mut self, plan: PlanRecord) {
        self.phases
            .entry(plan.phase)
            .or_insert_with(|| PhaseRecord {
                index: plan.phase,
                ..Default::default()
            });
        self.plans.insert(plan.id.clone(), plan);
        self.refresh();
    }

    /// Declare explicit upstream phases for a phase.
    pub fn set_phase_dependencies(&mut self, phase: u32, depends_on: Vec<u32>) {
        self.phases
            .entry(phase)
            .or_insert_with(|| PhaseRecord {
                index: phase,
                ..Default::default()
            })
            .depends_on = Some(depends_on);
        self.refresh();
    }

    pub fn plan(&self, id: &str) -> Option<&PlanRecord> {
        self.plans.get(id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &PlanRecord> {
        self.plans.values()
    }

    pub fn phases(&self) -> impl Iterator<Item = &PhaseRecord> {
        self.phases.values()
    }

    pub fn task(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.plans.get(&key.plan)?.tasks.get(&key.task)
    }

    /// All task keys in (plan, task) order.
    pub fn task_keys(&self) -> Vec<TaskKey> {
        self.plans
            .values()
            .flat_map(|p| p.tasks.keys().map(|t| TaskKey::new(p.id.clone(), t.clone())))
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.plans.values().map(|p| p.tasks.len()).sum()
    }

    /// Number of tasks in each status.
    pub fn count_by_status(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for task in self.plans.values().flat_map(|p| p.tasks.values()) {
            *counts.entry(task.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Status of a phase. Unknown phases with no plans count as completed.
    pub fn phase_status(&self, phase: u32) -> PhaseStatus {
        self.phases
            .get(&phase)
            .map(|p| p.status)
            .unwrap_or(PhaseStatus::Completed)
    }

    /// Register a plan definition, or merge it into an existing registration.
    ///
    /// New tasks are created with the status the plan declares. Tasks that are
    /// still `NotStarted` pick up changed dependencies, deliverables and flags;
    /// tasks that already started are left untouched.
    pub fn register_plan(
        &mut self,
        definition: &PlanDefinition,
        phase: u32,
    ) -> Result<RegisterSummary, IndexError> {
        let mut summary = RegisterSummary {
            plan: definition.id.clone(),
            ..Default::default()
        };

        if let Some(existing) = self.plans.get(&definition.id) {
            if existing.phase != phase {
                return Err(IndexError::PhaseMismatch {
                    plan: definition.id.clone(),
                    existing: existing.phase,
                    requested: phase,
                });
            }
        }

        if !self.plans.contains_key(&definition.id) {
            summary.created = true;
            self.insert_plan(PlanRecord::new(definition.id.clone(), phase));
        }

        let plan = self
            .plans
            .get_mut(&definition.id)
            .ok_or_else(|| IndexError::UnknownPlan {
                plan: definition.id.clone(),
            })?;

        if plan.status == PlanStatus::Completed {
            warn!(plan = %definition.id, "plan is archived; registration left it unchanged");
            return Ok(summary);
        }

        for task in &definition.tasks {
            let criteria = (task.criteria_total() > 0).then(|| CriteriaProgress {
                checked: task.criteria_checked(),
                total: task.criteria_total(),
            });

            match plan.tasks.get_mut(&task.id) {
                None => {
                    let mut record = TaskRecord::new(task.id.clone())
                        .with_status(task.status.unwrap_or_default())
                        .with_parallelizable(task.parallelizable)
                        .with_deps(task.dependencies.iter().cloned())
                        .with_deliverables(task.deliverables.iter().cloned());
                    record.criteria = criteria;
                    plan.tasks.insert(task.id.clone(), record);
                    summary.added.push(task.id.clone());
                }
                Some(record) if record.status == TaskStatus::NotStarted => {
                    let changed = record.parallelizable != task.parallelizable
                        || record.deps != task.dependencies
                        || record.deliverables != task.deliverables
                        || record.criteria != criteria;
                    if changed {
                        record.parallelizable = task.parallelizable;
                        record.deps = task.dependencies.clone();
                        record.deliverables = task.deliverables.clone();
                        record.criteria = criteria;
                        summary.updated.push(task.id.clone());
                    }
                }
                Some(_) => {}
            }
        }

        self.refresh();
        Ok(summary)
    }

    /// Move a task forward. Rejects any transition that is not a forward step.
    pub fn transition_task(&mut self, key: &TaskKey, next: TaskStatus) -> Result<(), IndexError> {
        let task = self.task_mut(key)?;
        if !task.status.can_transition_to(next) {
            return Err(IndexError::InvalidTransition {
                task: key.qualified(),
                from: task.status,
                to: next,
            });
        }
        task.status = next;
        self.refresh();
        Ok(())
    }

    /// Fold a terminal review-cycle outcome into the task record.
    pub fn record_outcome(&mut self, key: &TaskKey, outcome: TaskOutcome) -> Result<(), IndexError> {
        if !outcome.status.is_terminal() {
            let from = self.task(key).map(|t| t.status).unwrap_or_default();
            return Err(IndexError::InvalidTransition {
                task: key.qualified(),
                from,
                to: outcome.status,
            });
        }
        self.transition_task(key, outcome.status)?;
        let task = self.task_mut(key)?;
        task.iterations = outcome.iterations;
        task.findings = outcome.findings;
        task.failure_reason = outcome.failure_reason;
        Ok(())
    }

    fn task_mut(&mut self, key: &TaskKey) -> Result<&mut TaskRecord, IndexError> {
        let plan = self
            .plans
            .get_mut(&key.plan)
            .ok_or_else(|| IndexError::UnknownPlan {
                plan: key.plan.clone(),
            })?;
        plan.tasks
            .get_mut(&key.task)
            .ok_or_else(|| IndexError::UnknownTask {
                plan: key.plan.clone(),
                task: key.task.clone(),
            })
    }

    /// Recompute plan and phase statuses from task statuses.
    pub fn refresh(&mut self) {
        let policy = self.policy;
        for plan in self.plans.values_mut() {
            plan.status = plan.derive_status(policy);
        }

        for plan in self.plans.values() {
            self.phases.entry(plan.phase).or_insert_with(|| PhaseRecord {
                index: plan.phase,
                ..Default::default()
            });
        }

        // Plans-complete per phase, before looking at upstream phases.
        let settled: BTreeMap<u32, bool> = self
            .phases
            .keys()
            .map(|&phase| {
                let done = self
                    .plans
                    .values()
                    .filter(|p| p.phase == phase)
                    .all(|p| p.status == PlanStatus::Completed);
                (phase, done)
            })
            .collect();

        let upstream_done = |phase: u32, depends_on: &Option<Vec<u32>>| -> bool {
            match depends_on {
                Some(deps) => deps
                    .iter()
                    .all(|d| settled.get(d).copied().unwrap_or(true)),
                None => settled
                    .range(..phase)
                    .all(|(_, &done)| done),
            }
        };

        for (index, record) in self.phases.iter_mut() {
            record.status = if settled.get(index).copied().unwrap_or(true) {
                PhaseStatus::Completed
            } else if upstream_done(*index, &record.depends_on) {
                PhaseStatus::Ready
            } else {
                PhaseStatus::Blocked
            };
        }
    }
}
