//! Progress events emitted while a run is in flight.

use crate::progress::TaskStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A batch was claimed and is about to run.
    BatchStarted { batch: u32, tasks: Vec<String> },
    /// A task's review cycle acquired a pool slot.
    TaskStarted { batch: u32, task: String },
    /// A task's review cycle reached a terminal status.
    TaskFinished {
        batch: u32,
        task: String,
        status: TaskStatus,
        review_iterations: u32,
    },
    /// Every task in the batch finished and commits were attempted.
    BatchCompleted {
        batch: u32,
        completed: usize,
        completed_with_issues: usize,
        failed: usize,
    },
    /// The run ended.
    RunCompleted {
        completed: usize,
        completed_with_issues: usize,
        failed: usize,
        blocked: usize,
    },
}
