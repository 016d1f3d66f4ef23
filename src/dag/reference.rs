//! Task identities and dependency references.
//!
//! A dependency is written either as a bare task id (`TASK-3`, same plan) or
//! as a cross-plan pair (`auth-plan:TASK-9`).

use crate::errors::DependencyError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-/]*$").unwrap());

/// Fully qualified task identity: the owning plan plus the task id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub plan: String,
    pub task: String,
}

impl TaskKey {
    pub fn new(plan: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            task: task.into(),
        }
    }

    /// The `plan:TASK` form used as the persisted task key.
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.plan, self.task)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plan, self.task)
    }
}

/// A parsed dependency reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyRef {
    /// A task in the same plan as the dependent task.
    SamePlan { task: String },
    /// A task in another plan.
    CrossPlan { plan: String, task: String },
}

impl DependencyRef {
    /// Parse a raw reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use conductor::dag::DependencyRef;
    ///
    /// let dep = DependencyRef::parse("auth:TASK-2").unwrap();
    /// assert_eq!(dep, DependencyRef::CrossPlan { plan: "auth".into(), task: "TASK-2".into() });
    /// assert!(DependencyRef::parse("TASK 2").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, DependencyError> {
        let trimmed = raw.trim();
        let malformed = |reason| DependencyError::Malformed {
            reference: raw.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(malformed("empty reference"));
        }

        match trimmed.split_once(':') {
            Some((plan, task)) => {
                let (plan, task) = (plan.trim(), task.trim());
                if plan.is_empty() || task.is_empty() {
                    return Err(malformed("cross-plan reference needs both plan and task"));
                }
                if !IDENT_REGEX.is_match(plan) || !IDENT_REGEX.is_match(task) {
                    return Err(malformed("identifier contains invalid characters"));
                }
                Ok(Self::CrossPlan {
                    plan: plan.to_string(),
                    task: task.to_string(),
                })
            }
            None => {
                if !IDENT_REGEX.is_match(trimmed) {
                    return Err(malformed("identifier contains invalid characters"));
                }
                Ok(Self::SamePlan {
                    task: trimmed.to_string(),
                })
            }
        }
    }

    /// Resolve this reference relative to the plan that declares it.
    pub fn resolve(&self, owning_plan: &str) -> TaskKey {
        match self {
            Self::SamePlan { task } => TaskKey::new(owning_plan, task.clone()),
            Self::CrossPlan { plan, task } => TaskKey::new(plan.clone(), task.clone()),
        }
    }

    /// Whether this reference points into another plan.
    pub fn is_cross_plan(&self) -> bool {
        matches!(self, Self::CrossPlan { .. })
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SamePlan { task } => write!(f, "{}", task),
            Self::CrossPlan { plan, task } => write!(f, "{}:{}", plan, task),
        }
    }
}
