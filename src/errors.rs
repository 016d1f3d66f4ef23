//! Typed error hierarchy for the conductor core.
//!
//! Four enums cover the library's failure taxonomies:
//! - `StoreError`: progress store, lock file and persistence failures
//! - `IndexError`: rejected mutations of the in-memory progress index
//! - `PlanError`: plan file loading failures
//! - `DependencyError`: malformed dependency references

use crate::progress::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the progress store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Timed out acquiring lock {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("Failed to create lock file at {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read progress index at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write progress index at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Progress index at {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this error is lock contention rather than a hard failure.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Errors from mutating the progress index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Plan {plan} is not registered")]
    UnknownPlan { plan: String },

    #[error("Task {plan}:{task} is not registered")]
    UnknownTask { plan: String, task: String },

    #[error("Task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Plan {plan} is already registered in phase {existing}, not phase {requested}")]
    PhaseMismatch {
        plan: String,
        existing: u32,
        requested: u32,
    },
}

/// Errors from reading plan files.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan {plan} not found (looked in {searched:?})")]
    NotFound { plan: String, searched: Vec<PathBuf> },

    #[error("Failed to read plan file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from parsing dependency references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Malformed dependency reference '{reference}': {reason}")]
    Malformed {
        reference: String,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_carries_path_and_attempts() {
        let err = StoreError::LockTimeout {
            path: PathBuf::from("/x/progress.json.lock"),
            attempts: 7,
        };
        assert!(err.is_lock_timeout());
        let msg = err.to_string();
        assert!(msg.contains("progress.json.lock"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn store_error_converts_from_index_error() {
        let inner = IndexError::UnknownPlan {
            plan: "p1".to_string(),
        };
        let err: StoreError = inner.into();
        match &err {
            StoreError::Index(IndexError::UnknownPlan { plan }) => assert_eq!(plan, "p1"),
            _ => panic!("Expected StoreError::Index(UnknownPlan)"),
        }
        assert!(!err.is_lock_timeout());
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = IndexError::InvalidTransition {
            task: "p1:TASK-1".to_string(),
            from: TaskStatus::Completed,
            to: TaskStatus::NotStarted,
        };
        let msg = err.to_string();
        assert!(msg.contains("Completed"));
        assert!(msg.contains("NotStarted"));
    }

    #[test]
    fn plan_not_found_lists_searched_paths() {
        let err = PlanError::NotFound {
            plan: "auth".to_string(),
            searched: vec![PathBuf::from("plans/auth.md")],
        };
        assert!(err.to_string().contains("plans/auth.md"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::LockTimeout {
            path: PathBuf::new(),
            attempts: 1,
        });
        assert_std_error(&IndexError::UnknownPlan { plan: "x".into() });
        assert_std_error(&DependencyError::Malformed {
            reference: "?".into(),
            reason: "empty",
        });
    }
}
