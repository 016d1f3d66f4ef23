//! Task dependency graph, eligibility and batching.
//!
//! ## Architecture
//!
//! 1. **Reference** - Task keys and parsed dependency references
//! 2. **Builder** - Constructs a task graph and finds cycles
//! 3. **Resolver** - Computes the eligible frontier from a progress snapshot
//! 4. **Grouper** - Splits the frontier into sequential batches of concurrent tasks
//!
//! ## Example
//!
//! ```
//! use conductor::dag::{DependencyResolver, GroupCandidate, ParallelGrouper};
//! use conductor::progress::{PlanRecord, ProgressIndex, TaskRecord};
//!
//! let mut index = ProgressIndex::new();
//! index.insert_plan(
//!     PlanRecord::new("auth", 1)
//!         .with_task(TaskRecord::new("TASK-1").with_parallelizable(true))
//!         .with_task(TaskRecord::new("TASK-2").with_parallelizable(true))
//!         .with_task(TaskRecord::new("TASK-3").with_deps(["TASK-1"])),
//! );
//!
//! let resolution = DependencyResolver::new().resolve(&index);
//! assert_eq!(resolution.eligible.len(), 2);
//!
//! let candidates = GroupCandidate::from_index(&index, &resolution.eligible);
//! let batches = ParallelGrouper::new().group(&candidates);
//! assert_eq!(batches.len(), 1);
//! ```

mod builder;
mod grouper;
mod reference;
mod resolver;

pub use builder::{DagBuilder, TaskGraph};
pub use grouper::{Batch, GroupCandidate, ParallelGrouper};
pub use reference::{DependencyRef, TaskKey};
pub use resolver::{DependencyResolver, Resolution, ResolveWarning};
