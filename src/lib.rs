//! Plan and task orchestration.
//!
//! Tasks are declared in markdown plan files, registered into a shared
//! progress index, and driven to terminal states by the [`orchestrator`]:
//! dependencies are resolved into an eligible frontier, the frontier is split
//! into conflict-free batches, and every task runs a bounded implement, verify
//! and review cycle against pluggable [`worker`]s.

pub mod conductor_config;
pub mod config;
pub mod dag;
pub mod errors;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod review;
pub mod util;
pub mod worker;
