//! Eligibility resolution against a progress snapshot.
//!
//! A task is eligible when its phase is `Ready`, it is still `NotStarted`, and
//! every dependency reference points at a `Completed` task. A dependency that
//! ended `CompletedWithIssues` keeps its dependents waiting whatever the
//! issues policy says; that policy only settles plans and phases. The frontier
//! is recomputed from scratch on every call.

use crate::dag::builder::DagBuilder;
use crate::dag::reference::{DependencyRef, TaskKey};
use crate::progress::{PhaseStatus, ProgressIndex, TaskStatus};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Why a task was left out of the frontier despite being otherwise ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveWarning {
    MalformedDependency {
        task: TaskKey,
        reference: String,
        reason: String,
    },
    MissingPlan {
        task: TaskKey,
        plan: String,
    },
    MissingTask {
        task: TaskKey,
        dependency: TaskKey,
    },
    Cycle {
        task: TaskKey,
    },
}

impl ResolveWarning {
    pub fn task(&self) -> &TaskKey {
        match self {
            Self::MalformedDependency { task, .. }
            | Self::MissingPlan { task, .. }
            | Self::MissingTask { task, .. }
            | Self::Cycle { task } => task,
        }
    }
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDependency {
                task,
                reference,
                reason,
            } => write!(f, "{}: malformed dependency '{}' ({})", task, reference, reason),
            Self::MissingPlan { task, plan } => {
                write!(f, "{}: depends on unknown plan '{}'", task, plan)
            }
            Self::MissingTask { task, dependency } => {
                write!(f, "{}: depends on unknown task {}", task, dependency)
            }
            Self::Cycle { task } => write!(f, "{}: part of a dependency cycle", task),
        }
    }
}

/// The eligible frontier plus everything that was excluded with a reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Sorted by (plan, task).
    pub eligible: Vec<TaskKey>,
    pub warnings: Vec<ResolveWarning>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Stateless resolver over [`ProgressIndex`] snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Compute the eligible frontier of `index`.
    pub fn resolve(&self, index: &ProgressIndex) -> Resolution {
        let cyclic = Self::dependency_graph(index).cyclic_nodes();
        let mut resolution = Resolution::default();

        for plan in index.plans() {
            if index.phase_status(plan.phase) != PhaseStatus::Ready {
                continue;
            }
            for task in plan.tasks.values() {
                if task.status != TaskStatus::NotStarted {
                    continue;
                }
                let key = TaskKey::new(plan.id.clone(), task.id.clone());

                if cyclic.contains(&key) {
                    resolution.warnings.push(ResolveWarning::Cycle { task: key });
                    continue;
                }

                let mut eligible = true;
                let mut excluded = false;
                for raw in &task.deps {
                    let dependency = match DependencyRef::parse(raw) {
                        Ok(dep) => dep.resolve(&plan.id),
                        Err(e) => {
                            resolution.warnings.push(ResolveWarning::MalformedDependency {
                                task: key.clone(),
                                reference: raw.clone(),
                                reason: e.to_string(),
                            });
                            excluded = true;
                            break;
                        }
                    };

                    if index.plan(&dependency.plan).is_none() {
                        resolution.warnings.push(ResolveWarning::MissingPlan {
                            task: key.clone(),
                            plan: dependency.plan,
                        });
                        excluded = true;
                        break;
                    }

                    match index.task(&dependency) {
                        Some(dep) if dep.status == TaskStatus::Completed => {}
                        Some(_) => eligible = false,
                        None => {
                            resolution.warnings.push(ResolveWarning::MissingTask {
                                task: key.clone(),
                                dependency,
                            });
                            excluded = true;
                            break;
                        }
                    }
                }

                if eligible && !excluded {
                    resolution.eligible.push(key);
                }
            }
        }

        for warning in &resolution.warnings {
            warn!("{}", warning);
        }
        resolution.eligible.sort();
        resolution
    }

    fn dependency_graph(index: &ProgressIndex) -> crate::dag::TaskGraph {
        let mut builder = DagBuilder::new();
        for plan in index.plans() {
            for task in plan.tasks.values() {
                let key = TaskKey::new(plan.id.clone(), task.id.clone());
                builder.add_task(key.clone());
                for dep in task.deps.iter().filter_map(|raw| DependencyRef::parse(raw).ok()) {
                    builder.add_dependency(dep.resolve(&plan.id), key.clone());
                }
            }
        }
        builder.build()
    }
}
