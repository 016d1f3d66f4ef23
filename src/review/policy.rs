//! Iteration-dependent review strictness.
//!
//! Each review iteration looks at less than the one before it:
//!
//! | Iteration | Strictness                 | Counts                                          |
//! |-----------|----------------------------|-------------------------------------------------|
//! | 1         | `AllCategories`            | every finding the reviewer reports              |
//! | 2         | `CarriedAndRegressions`    | findings carried from iteration 1 + regressions |
//! | 3         | `CriticalResolution`       | previously critical findings still present      |

use crate::review::findings::ReviewFinding;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Upper bound on review iterations per task.
pub const MAX_REVIEW_ITERATIONS: u32 = 3;

/// The three review iterations a task can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewIteration {
    First,
    Second,
    Third,
}

/// What a review iteration is allowed to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStrictness {
    AllCategories,
    CarriedAndRegressions,
    CriticalResolution,
}

/// Strictness keyed by iteration.
const STRICTNESS_TABLE: [(ReviewIteration, ReviewStrictness); MAX_REVIEW_ITERATIONS as usize] = [
    (ReviewIteration::First, ReviewStrictness::AllCategories),
    (ReviewIteration::Second, ReviewStrictness::CarriedAndRegressions),
    (ReviewIteration::Third, ReviewStrictness::CriticalResolution),
];

impl ReviewIteration {
    /// Map a 1-based iteration number onto the table. Returns `None` past the bound.
    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Third),
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
        }
    }

    /// The iteration after this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    /// Look up this iteration's strictness.
    pub fn strictness(self) -> ReviewStrictness {
        STRICTNESS_TABLE
            .iter()
            .find(|(iteration, _)| *iteration == self)
            .map(|(_, strictness)| *strictness)
            .unwrap_or(ReviewStrictness::CriticalResolution)
    }
}

impl fmt::Display for ReviewIteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl ReviewStrictness {
    /// Filter a reviewer's raw findings down to the ones this strictness counts.
    ///
    /// `carried` holds the counted findings of the previous iteration. Under
    /// `CriticalResolution`, only the critical ones among them are considered.
    pub fn filter(
        self,
        carried: &[ReviewFinding],
        reported: Vec<ReviewFinding>,
    ) -> Vec<ReviewFinding> {
        match self {
            Self::AllCategories => reported,
            Self::CarriedAndRegressions => {
                let carried: HashSet<String> =
                    carried.iter().map(ReviewFinding::fingerprint).collect();
                reported
                    .into_iter()
                    .filter(|f| f.is_regression() || carried.contains(&f.fingerprint()))
                    .collect()
            }
            Self::CriticalResolution => {
                let critical: HashSet<String> = carried
                    .iter()
                    .filter(|f| f.is_critical())
                    .map(ReviewFinding::fingerprint)
                    .collect();
                reported
                    .into_iter()
                    .filter(|f| critical.contains(&f.fingerprint()))
                    .collect()
            }
        }
    }
}
