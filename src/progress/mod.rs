//! Progress tracking: the index aggregate and its durable store.

pub mod document;
pub mod index;
pub mod lock;
pub mod store;

pub use index::{
    CriteriaProgress, IssuesPolicy, PhaseRecord, PhaseStatus, PlanRecord, PlanStatus,
    ProgressIndex, RegisterSummary, TaskOutcome, TaskRecord, TaskStatus,
};
pub use lock::{LockGuard, LockSettings};
pub use store::{ProgressStore, SaveOutcome};
