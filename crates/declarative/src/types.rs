//! Core types for convergence runs

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a step failure affects the rest of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// Failure aborts the run
    Fatal,
    /// Failure is logged and the run continues
    Recoverable,
    /// Progress only; failure is logged as a warning
    Informational,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fatal => "fatal",
            Self::Recoverable => "recoverable",
            Self::Informational => "informational",
        };
        f.write_str(s)
    }
}

/// Result of converging one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Already matched the declared state
    NoChange,
    /// Resource was created
    Created,
    /// Resource was overwritten or patched
    Updated,
    /// Apply failed
    Failed { error: String },
    /// Apply was skipped
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoChange => "no change",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Counts of apply results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub no_change: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ApplySummary {
    /// Check if every resource converged (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

impl<'a> FromIterator<&'a ApplyResult> for ApplySummary {
    fn from_iter<I: IntoIterator<Item = &'a ApplyResult>>(iter: I) -> Self {
        let mut summary = Self::default();
        for result in iter {
            summary.add_result(result);
        }
        summary
    }
}
