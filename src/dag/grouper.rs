//! Partitioning of eligible tasks into execution batches.
//!
//! Batches run one after another; the tasks inside one batch run concurrently.
//! Tasks are first layered into dependency waves, then each wave is split:
//! non-parallelizable tasks get a batch of their own and parallelizable tasks
//! are packed first-fit, never sharing a batch with a task that names the same
//! deliverable.

use crate::dag::builder::DagBuilder;
use crate::dag::reference::{DependencyRef, TaskKey};
use crate::progress::ProgressIndex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// What the grouper needs to know about one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCandidate {
    pub key: TaskKey,
    pub parallelizable: bool,
    pub deliverables: Vec<String>,
    /// Resolved dependencies; only those inside the candidate set matter.
    pub deps: Vec<TaskKey>,
}

impl GroupCandidate {
    pub fn new(key: TaskKey) -> Self {
        Self {
            key,
            parallelizable: false,
            deliverables: Vec::new(),
            deps: Vec::new(),
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallelizable = true;
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

    pub fn with_deps(mut self, deps: Vec<TaskKey>) -> Self {
        self.deps = deps;
        self
    }

    /// Build candidates for `keys` from their index records. Unknown keys are skipped.
    pub fn from_index(index: &ProgressIndex, keys: &[TaskKey]) -> Vec<Self> {
        keys.iter()
            .filter_map(|key| {
                let record = index.task(key)?;
                let deps = record
                    .deps
                    .iter()
                    .filter_map(|raw| DependencyRef::parse(raw).ok())
                    .map(|dep| dep.resolve(&key.plan))
                    .collect();
                Some(Self {
                    key: key.clone(),
                    parallelizable: record.parallelizable,
                    deliverables: record.deliverables.clone(),
                    deps,
                })
            })
            .collect()
    }

    fn normalized_deliverables(&self) -> HashSet<String> {
        self.deliverables
            .iter()
            .map(|d| d.trim().trim_start_matches("./").to_string())
            .filter(|d| !d.is_empty())
            .collect()
    }
}

/// A set of tasks dispatched together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub tasks: Vec<TaskKey>,
    /// Holds a single non-parallelizable task.
    pub exclusive: bool,
}

impl Batch {
    fn exclusive(key: TaskKey) -> Self {
        Self {
            tasks: vec![key],
            exclusive: true,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains(key)
    }
}

/// Groups candidates into ordered batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelGrouper {
    max_batch_size: Option<usize>,
}

impl ParallelGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of tasks in one parallel batch.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max.max(1));
        self
    }

    pub fn group(&self, candidates: &[GroupCandidate]) -> Vec<Batch> {
        let by_key: BTreeMap<&TaskKey, &GroupCandidate> =
            candidates.iter().map(|c| (&c.key, c)).collect();

        let mut builder = DagBuilder::new();
        for candidate in by_key.values() {
            builder.add_task(candidate.key.clone());
            for dep in &candidate.deps {
                builder.add_dependency(dep.clone(), candidate.key.clone());
            }
        }
        let graph = builder.build();

        let mut batches = Vec::new();
        for (wave_index, wave) in graph.waves().into_iter().enumerate() {
            let mut parallel: Vec<(Batch, HashSet<String>)> = Vec::new();

            for key in wave {
                let Some(candidate) = by_key.get(&key) else {
                    continue;
                };
                if !candidate.parallelizable {
                    batches.push(Batch::exclusive(key));
                    continue;
                }

                let deliverables = candidate.normalized_deliverables();
                let slot = parallel.iter_mut().find(|(batch, claimed)| {
                    self.max_batch_size.is_none_or(|max| batch.len() < max)
                        && claimed.is_disjoint(&deliverables)
                });
                match slot {
                    Some((batch, claimed)) => {
                        batch.tasks.push(key);
                        claimed.extend(deliverables);
                    }
                    None => parallel.push((
                        Batch {
                            tasks: vec![key],
                            exclusive: false,
                        },
                        deliverables,
                    )),
                }
            }

            debug!(
                wave = wave_index,
                parallel_batches = parallel.len(),
                "wave grouped"
            );
            batches.extend(parallel.into_iter().map(|(batch, _)| batch));
        }

        // In-set cycles cannot come from a resolved frontier, but never drop a task.
        for key in graph.cyclic_nodes() {
            warn!(task = %key, "task in dependency cycle scheduled on its own");
            batches.push(Batch::exclusive(key));
        }

        batches
    }
}
