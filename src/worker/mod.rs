//! Execution worker boundary.
//!
//! Producing the work product for a task is opaque to the core: a worker is
//! handed a [`WorkRequest`] and answers with a [`WorkOutcome`]. The review
//! cycle talks to three role variants (implementer, verifier, reviewer) that
//! all share the single [`ExecutionWorker`] capability.

pub mod command;

pub use command::{CommandWorker, CommandWorkerConfig};

use crate::dag::TaskKey;
use crate::review::findings::ReviewFinding;
use crate::review::policy::ReviewStrictness;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The role a worker plays inside a review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Implementer,
    Verifier,
    Reviewer,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implementer => "implementer",
            Self::Verifier => "verifier",
            Self::Reviewer => "reviewer",
        };
        write!(f, "{}", s)
    }
}

/// Everything a worker needs to know about the task it is working on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub plan: String,
    pub task: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
}

impl TaskAssignment {
    pub fn new(key: &TaskKey) -> Self {
        Self {
            plan: key.plan.clone(),
            task: key.task.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.plan.clone(), self.task.clone())
    }

    pub fn with_deliverables(mut self, deliverables: Vec<String>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_completion_criteria(mut self, criteria: Vec<String>) -> Self {
        self.completion_criteria = criteria;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// One call into a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub role: WorkerRole,
    pub assignment: TaskAssignment,
    /// Implement/verify attempt within the current stage (1-based).
    pub attempt: u32,
    /// Review iteration this request belongs to (0 before the first review).
    pub review_iteration: u32,
    /// Set for reviewer requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strictness: Option<ReviewStrictness>,
    /// Findings the implementer should address, or the reviewer should re-check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ReviewFinding>,
}

impl WorkRequest {
    pub fn new(role: WorkerRole, assignment: TaskAssignment) -> Self {
        Self {
            role,
            assignment,
            attempt: 1,
            review_iteration: 0,
            strictness: None,
            findings: Vec::new(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_review_iteration(mut self, iteration: u32) -> Self {
        self.review_iteration = iteration;
        self
    }

    pub fn with_strictness(mut self, strictness: ReviewStrictness) -> Self {
        self.strictness = Some(strictness);
        self
    }

    pub fn with_findings(mut self, findings: Vec<ReviewFinding>) -> Self {
        self.findings = findings;
        self
    }
}

/// What a worker reports back: success, or failure with findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkOutcome {
    pub success: bool,
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
}

impl WorkOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            findings: Vec::new(),
        }
    }

    pub fn failure(findings: Vec<ReviewFinding>) -> Self {
        Self {
            success: false,
            findings,
        }
    }

    pub fn with_findings(mut self, findings: Vec<ReviewFinding>) -> Self {
        self.findings = findings;
        self
    }
}

/// Execute one step of work for a task and report the outcome.
///
/// An `Err` means the worker could not run at all; a task that ran and did
/// not succeed is an `Ok` outcome with `success == false`.
#[async_trait]
pub trait ExecutionWorker: Send + Sync {
    async fn execute(&self, request: &WorkRequest) -> Result<WorkOutcome>;
}

/// The three role variants used by a review cycle.
#[derive(Clone)]
pub struct WorkerSet {
    implementer: Arc<dyn ExecutionWorker>,
    verifier: Arc<dyn ExecutionWorker>,
    reviewer: Arc<dyn ExecutionWorker>,
}

impl WorkerSet {
    pub fn new(
        implementer: Arc<dyn ExecutionWorker>,
        verifier: Arc<dyn ExecutionWorker>,
        reviewer: Arc<dyn ExecutionWorker>,
    ) -> Self {
        Self {
            implementer,
            verifier,
            reviewer,
        }
    }

    /// Get the worker for a role.
    pub fn for_role(&self, role: WorkerRole) -> &dyn ExecutionWorker {
        match role {
            WorkerRole::Implementer => self.implementer.as_ref(),
            WorkerRole::Verifier => self.verifier.as_ref(),
            WorkerRole::Reviewer => self.reviewer.as_ref(),
        }
    }

    /// Dispatch a request to the worker matching its role.
    pub async fn execute(&self, request: &WorkRequest) -> Result<WorkOutcome> {
        self.for_role(request.role).execute(request).await
    }
}

impl fmt::Debug for WorkerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSet").finish_non_exhaustive()
    }
}
