//! Orchestration of eligible tasks across plans and phases.

pub mod events;
pub mod report;
pub mod runner;

pub use events::RunEvent;
pub use report::{ExecutionTimer, RunReport, TaskResult};
pub use runner::{DEFAULT_MAX_PARALLEL, DEFAULT_MAX_STEPS, Orchestrator, OrchestratorConfig};
