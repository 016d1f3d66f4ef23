//! Review cycle for individual tasks.
//!
//! ## Components
//!
//! - [`findings`]: Findings, verdicts and per-iteration outcomes
//! - [`policy`]: The iteration to strictness table
//! - [`cycle`]: The implement, verify and review loop
//!
//! ## Example
//!
//! ```
//! use conductor::review::{FindingSeverity, ReviewFinding, ReviewIteration, ReviewStrictness};
//!
//! let carried = vec![ReviewFinding::new(FindingSeverity::Critical, "sql injection")];
//! let reported = vec![
//!     ReviewFinding::new(FindingSeverity::Critical, "SQL injection"),
//!     ReviewFinding::new(FindingSeverity::Warning, "new nit"),
//! ];
//!
//! let strictness = ReviewIteration::Third.strictness();
//! assert_eq!(strictness, ReviewStrictness::CriticalResolution);
//! assert_eq!(strictness.filter(&carried, reported).len(), 1);
//! ```

pub mod cycle;
pub mod findings;
pub mod policy;

pub use cycle::{CycleReport, DEFAULT_MAX_FIX_ATTEMPTS, ReviewCycleController};
pub use findings::{FindingSeverity, ReviewFinding, ReviewOutcome, ReviewVerdict};
pub use policy::{MAX_REVIEW_ITERATIONS, ReviewIteration, ReviewStrictness};
