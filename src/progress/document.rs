//! On-disk shape of `progress.json`.
//!
//! The document keeps tasks in a flat map keyed by `plan-id:TASK-ID` so other
//! tools can address a task without walking the plan tree. Loading is lenient:
//! a task entry whose plan is missing is dropped with a warning, and a plan that
//! lists an unknown task gets a fresh `NotStarted` record.

use crate::progress::index::{
    CriteriaProgress, PhaseRecord, PhaseStatus, PlanRecord, PlanStatus, ProgressIndex, TaskRecord,
    TaskStatus,
};
use crate::review::findings::ReviewFinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases: BTreeMap<u32, PhaseEntry>,
    #[serde(default)]
    pub plans: BTreeMap<String, PlanEntry>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEntry {
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub phase: u32,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub parallelizable: bool,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<CriteriaProgress>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ReviewFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn task_id_key(plan: &str, task: &str) -> String {
    format!("{}:{}", plan, task)
}

impl From<&ProgressIndex> for IndexDocument {
    fn from(index: &ProgressIndex) -> Self {
        let phases = index
            .phases
            .values()
            .map(|p| {
                (
                    p.index,
                    PhaseEntry {
                        status: p.status,
                        depends_on: p.depends_on.clone(),
                    },
                )
            })
            .collect();

        let mut plans = BTreeMap::new();
        let mut tasks = BTreeMap::new();
        for plan in index.plans.values() {
            plans.insert(
                plan.id.clone(),
                PlanEntry {
                    phase: plan.phase,
                    status: plan.status,
                    tasks: plan.tasks.keys().cloned().collect(),
                },
            );
            for task in plan.tasks.values() {
                tasks.insert(
                    task_id_key(&plan.id, &task.id),
                    TaskEntry {
                        status: task.status,
                        parallelizable: task.parallelizable,
                        deps: task.deps.clone(),
                        deliverables: task.deliverables.clone(),
                        criteria: task.criteria,
                        iterations: task.iterations,
                        findings: task.findings.clone(),
                        failure_reason: task.failure_reason.clone(),
                    },
                );
            }
        }

        Self {
            version: index.version,
            last_updated: index.last_updated,
            phases,
            plans,
            tasks,
        }
    }
}

impl IndexDocument {
    /// Build the in-memory aggregate. Derived statuses are recomputed.
    pub fn into_index(mut self) -> ProgressIndex {
        let mut index = ProgressIndex {
            version: self.version,
            last_updated: self.last_updated,
            ..Default::default()
        };

        for (phase, entry) in &self.phases {
            index.phases.insert(
                *phase,
                PhaseRecord {
                    index: *phase,
                    status: entry.status,
                    depends_on: entry.depends_on.clone(),
                },
            );
        }

        for (plan_id, entry) in &self.plans {
            let mut plan = PlanRecord::new(plan_id.clone(), entry.phase);
            plan.status = entry.status;
            for task_id in &entry.tasks {
                let record = match self.tasks.remove(&task_id_key(plan_id, task_id)) {
                    Some(t) => TaskRecord {
                        id: task_id.clone(),
                        status: t.status,
                        parallelizable: t.parallelizable,
                        deps: t.deps,
                        deliverables: t.deliverables,
                        criteria: t.criteria,
                        iterations: t.iterations,
                        findings: t.findings,
                        failure_reason: t.failure_reason,
                    },
                    None => {
                        warn!(plan = %plan_id, task = %task_id, "task listed by plan has no entry");
                        TaskRecord::new(task_id.clone())
                    }
                };
                plan.tasks.insert(task_id.clone(), record);
            }
            index.phases.entry(entry.phase).or_insert_with(|| PhaseRecord {
                index: entry.phase,
                ..Default::default()
            });
            index.plans.insert(plan_id.clone(), plan);
        }

        for orphan in self.tasks.keys() {
            warn!(task = %orphan, "dropping task entry with no owning plan");
        }

        index.refresh();
        index
    }
}
