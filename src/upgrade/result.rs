use serde::Serialize;

use super::operation::OperationKind;
use crate::error::OperationError;
use crate::version::Version;

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum OperationFailure {
    /// `execute` (or `can_run`) returned an error.
    Execution { message: String, detail: String },
    /// `execute` succeeded but the post-condition check did not, under strict
    /// verification.
    Verification { message: String },
    /// A preserved field lost its content. Signals a bug, not bad luck.
    CriticalDataLoss { message: String },
}

impl OperationFailure {
    pub fn message(&self) -> &str {
        match self {
            OperationFailure::Execution { message, .. }
            | OperationFailure::Verification { message }
            | OperationFailure::CriticalDataLoss { message } => message,
        }
    }
}

impl From<OperationError> for OperationFailure {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Execution { message, detail } => {
                OperationFailure::Execution { message, detail }
            }
            OperationError::CriticalDataLoss { message } => {
                OperationFailure::CriticalDataLoss { message }
            }
        }
    }
}

/// Terminal state of one operation within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Completion flag was already set; nothing ran.
    AlreadyCompleted,
    /// `can_run` said no.
    NotRunnable,
    /// Ran, and its completion flag is now set. `verified` is false when the
    /// post-condition check failed under the lenient policy.
    Completed { message: String, verified: bool },
    Failed(OperationFailure),
    /// Manual operation the user chose to postpone.
    Deferred,
}

impl OperationStatus {
    /// Nothing is left to do for the operation: it is recorded as complete, or
    /// its prerequisites are not met.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OperationStatus::AlreadyCompleted
                | OperationStatus::NotRunnable
                | OperationStatus::Completed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub version: Version,
    pub operation_id: String,
    pub name: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeResult {
    pub from_version: Version,
    pub to_version: Version,
    pub results: Vec<OperationResult>,
}

impl UpgradeResult {
    pub fn new(from_version: Version, to_version: Version) -> Self {
        Self {
            from_version,
            to_version,
            results: Vec::new(),
        }
    }

    /// True when no operation failed. Postponed manual operations do not count
    /// as failures.
    pub fn success(&self) -> bool {
        self.failed_count() == 0
    }

    /// True when the running version can be flagged as fully upgraded.
    pub fn is_complete(&self) -> bool {
        self.success() && self.deferred_count() == 0
    }

    pub fn executed_count(&self) -> usize {
        self.count(|s| matches!(s, OperationStatus::Completed { .. }))
    }

    /// Already completed, not runnable, or postponed.
    pub fn skipped_count(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                OperationStatus::AlreadyCompleted
                    | OperationStatus::NotRunnable
                    | OperationStatus::Deferred
            )
        })
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, OperationStatus::Failed(_)))
    }

    pub fn deferred_count(&self) -> usize {
        self.count(|s| matches!(s, OperationStatus::Deferred))
    }

    pub fn has_critical_failure(&self) -> bool {
        self.count(|s| {
            matches!(
                s,
                OperationStatus::Failed(OperationFailure::CriticalDataLoss { .. })
            )
        }) > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&OperationResult, &OperationFailure)> {
        self.results.iter().filter_map(|r| match &r.status {
            OperationStatus::Failed(failure) => Some((r, failure)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&OperationStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    /// One-line summary for the end-of-run notification.
    pub fn summary(&self) -> String {
        let counts = format!(
            "{} executed, {} skipped, {} failed",
            self.executed_count(),
            self.skipped_count(),
            self.failed_count()
        );

        let mut summary = if self.success() {
            format!("Upgrade to {} finished: {}.", self.to_version, counts)
        } else {
            format!(
                "Upgrade to {} incomplete: {}. It will be retried on next start; see the log for details.",
                self.to_version, counts
            )
        };

        if self.has_critical_failure() {
            summary.push_str(" CRITICAL: a data preservation check failed; the state from before that operation was saved back.");
        }
        if self.deferred_count() > 0 {
            summary.push_str(&format!(
                " {} optional operation(s) postponed and will be offered again.",
                self.deferred_count()
            ));
        }
        summary
    }
}
