//! Plan definitions as read from plan files.

pub mod reader;

pub use reader::{PlanReader, parse_plan};

use crate::progress::TaskStatus;
use serde::Serialize;

/// One checklist item of a task's completion criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Criterion {
    pub text: String,
    pub checked: bool,
}

/// Scheduling fields of one task section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDefinition {
    pub id: String,
    pub title: String,
    /// Status declared in the plan file, if any.
    pub status: Option<TaskStatus>,
    pub parallelizable: bool,
    pub deliverables: Vec<String>,
    /// Raw dependency references in declaration order.
    pub dependencies: Vec<String>,
    pub criteria: Vec<Criterion>,
    /// False when a field could not be understood; the task is never dispatched.
    pub schedulable: bool,
    /// Parse problems for this task.
    pub issues: Vec<String>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            status: None,
            parallelizable: false,
            deliverables: Vec::new(),
            dependencies: Vec::new(),
            criteria: Vec::new(),
            schedulable: true,
            issues: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_parallelizable(mut self, parallelizable: bool) -> Self {
        self.parallelizable = parallelizable;
        self
    }

    pub fn with_deliverables(mut self, deliverables: Vec<String>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn criteria_total(&self) -> u32 {
        self.criteria.len() as u32
    }

    pub fn criteria_checked(&self) -> u32 {
        self.criteria.iter().filter(|c| c.checked).count() as u32
    }

    /// Record a parse problem and take the task out of scheduling.
    pub(crate) fn mark_unschedulable(&mut self, issue: String) {
        self.schedulable = false;
        self.issues.push(issue);
    }
}

/// A parsed plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDefinition {
    pub id: String,
    pub tasks: Vec<TaskDefinition>,
}

impl PlanDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
