//! Review findings and per-iteration outcomes.
//!
//! ## Types
//!
//! - [`FindingSeverity`]: Severity classification for individual findings
//! - [`ReviewFinding`]: A single issue raised against a task's work product
//! - [`ReviewVerdict`]: Verdict of one review iteration
//! - [`ReviewOutcome`]: Ephemeral record of one review iteration
//!
//! ## Example
//!
//! ```
//! use conductor::review::findings::{FindingSeverity, ReviewFinding};
//!
//! let finding = ReviewFinding::new(FindingSeverity::Critical, "Token is logged in plain text")
//!     .with_location("src/auth.rs:42")
//!     .with_category("security");
//!
//! assert!(finding.is_critical());
//! assert_eq!(finding.location(), Some("src/auth.rs:42"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for individual review findings, most severe first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Correctness or security problem that must be fixed.
    Critical,
    /// Problem that should be addressed before approval.
    #[default]
    Warning,
    /// Observation that never blocks approval.
    Info,
}

impl FindingSeverity {
    /// Check if this severity is critical.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// Check if this severity blocks approval (critical or warning).
    ///
    /// # Examples
    ///
    /// ```
    /// use conductor::review::findings::FindingSeverity;
    ///
    /// assert!(FindingSeverity::Critical.is_actionable());
    /// assert!(FindingSeverity::Warning.is_actionable());
    /// assert!(!FindingSeverity::Info.is_actionable());
    /// ```
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Critical | Self::Warning)
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// A single finding reported by a verifier or reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    /// Severity of this finding.
    #[serde(default)]
    severity: FindingSeverity,
    /// Description of the issue.
    description: String,
    /// Where the issue lives (path, path:line, or a deliverable name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    /// Category or rule that raised this finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    /// Set by a reviewer when the issue was introduced by a fix.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    regression: bool,
}

impl ReviewFinding {
    /// Create a new finding.
    pub fn new(severity: FindingSeverity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            location: None,
            category: None,
            regression: false,
        }
    }

    /// Set the location for this finding.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the category for this finding.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Mark this finding as a regression introduced by a fix.
    pub fn as_regression(mut self) -> Self {
        self.regression = true;
        self
    }

    pub fn severity(&self) -> FindingSeverity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_regression(&self) -> bool {
        self.regression
    }

    pub fn is_critical(&self) -> bool {
        self.severity.is_critical()
    }

    pub fn is_actionable(&self) -> bool {
        self.severity.is_actionable()
    }

    /// Identity used to match a finding across review iterations.
    ///
    /// Severity and the regression flag are not part of the identity, so a
    /// finding downgraded from critical to warning is still "the same" issue.
    ///
    /// # Examples
    ///
    /// ```
    /// use conductor::review::findings::{FindingSeverity, ReviewFinding};
    ///
    /// let a = ReviewFinding::new(FindingSeverity::Critical, "Missing  input validation");
    /// let b = ReviewFinding::new(FindingSeverity::Warning, "missing input validation ");
    /// assert_eq!(a.fingerprint(), b.fingerprint());
    /// ```
    pub fn fingerprint(&self) -> String {
        fn normalize(s: &str) -> String {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        }

        format!(
            "{}|{}|{}",
            normalize(self.category.as_deref().unwrap_or_default()),
            normalize(self.location.as_deref().unwrap_or_default()),
            normalize(&self.description)
        )
    }
}

impl fmt::Display for ReviewFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.severity)?;
        if let Some(ref category) = self.category {
            write!(f, " ({})", category)?;
        }
        if let Some(ref location) = self.location {
            write!(f, " {}:", location)?;
        }
        write!(f, " {}", self.description)?;
        if self.regression {
            write!(f, " [regression]")?;
        }
        Ok(())
    }
}

/// Verdict of a single review iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

impl ReviewVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "Approved",
            Self::ChangesRequested => "ChangesRequested",
        };
        write!(f, "{}", s)
    }
}

/// Result of one review iteration. Lives only as long as the review cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub verdict: ReviewVerdict,
    /// Findings that counted under this iteration's strictness.
    pub findings: Vec<ReviewFinding>,
    /// 1-based review iteration number.
    pub iteration: u32,
}

impl ReviewOutcome {
    /// Build an outcome from the findings that survived the strictness filter.
    ///
    /// The verdict is `ChangesRequested` exactly when an actionable finding remains.
    pub fn from_findings(iteration: u32, findings: Vec<ReviewFinding>) -> Self {
        let verdict = if findings.iter().any(ReviewFinding::is_actionable) {
            ReviewVerdict::ChangesRequested
        } else {
            ReviewVerdict::Approved
        };
        Self {
            verdict,
            findings,
            iteration,
        }
    }

    /// Findings that block approval.
    pub fn actionable_findings(&self) -> Vec<&ReviewFinding> {
        self.findings.iter().filter(|f| f.is_actionable()).collect()
    }

    /// Critical findings of this iteration.
    pub fn critical_findings(&self) -> Vec<&ReviewFinding> {
        self.findings.iter().filter(|f| f.is_critical()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(FindingSeverity::Critical < FindingSeverity::Warning);
        assert!(FindingSeverity::Warning < FindingSeverity::Info);
    }

    #[test]
    fn test_finding_display() {
        let finding = ReviewFinding::new(FindingSeverity::Warning, "Unused import")
            .with_location("src/lib.rs:3")
            .with_category("style");
        let text = finding.to_string();
        assert!(text.contains("[warning]"));
        assert!(text.contains("(style)"));
        assert!(text.contains("src/lib.rs:3"));
        assert!(text.contains("Unused import"));
    }

    #[test]
    fn test_fingerprint_distinguishes_location() {
        let a = ReviewFinding::new(FindingSeverity::Warning, "Unchecked unwrap")
            .with_location("src/a.rs");
        let b = ReviewFinding::new(FindingSeverity::Warning, "Unchecked unwrap")
            .with_location("src/b.rs");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_finding_deserializes_with_defaults() {
        let finding: ReviewFinding =
            serde_json::from_str(r#"{"description": "tests missing"}"#).unwrap();
        assert_eq!(finding.severity(), FindingSeverity::Warning);
        assert!(!finding.is_regression());
        assert!(finding.location().is_none());
    }

    #[test]
    fn test_regression_flag_serialization() {
        let plain = ReviewFinding::new(FindingSeverity::Info, "note");
        let json = serde_json::to_string(&plain).unwrap();
        assert!(!json.contains("regression"));

        let regression = plain.as_regression();
        let json = serde_json::to_string(&regression).unwrap();
        assert!(json.contains("\"regression\":true"));
    }

    #[test]
    fn test_outcome_verdict_from_findings() {
        let approved = ReviewOutcome::from_findings(
            1,
            vec![ReviewFinding::new(FindingSeverity::Info, "consider renaming")],
        );
        assert!(approved.verdict.is_approved());
        assert!(approved.actionable_findings().is_empty());

        let changes = ReviewOutcome::from_findings(
            2,
            vec![
                ReviewFinding::new(FindingSeverity::Critical, "panics on empty input"),
                ReviewFinding::new(FindingSeverity::Info, "nit"),
            ],
        );
        assert_eq!(changes.verdict, ReviewVerdict::ChangesRequested);
        assert_eq!(changes.actionable_findings().len(), 1);
        assert_eq!(changes.critical_findings().len(), 1);
        assert_eq!(changes.iteration, 2);
    }
}
