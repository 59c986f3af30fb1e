//! Per-run result reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::Action;

/// What happened to one planned stack. Skipped is distinct from Failed:
/// no provider call was attempted for a skipped stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackOutcome {
    Applied,
    NoOp,
    Failed,
    RolledBack,
    RollbackFailed,
    Skipped,
}

impl StackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackOutcome::Applied => "applied",
            StackOutcome::NoOp => "no-op",
            StackOutcome::Failed => "failed",
            StackOutcome::RolledBack => "rolled-back",
            StackOutcome::RollbackFailed => "rollback-failed",
            StackOutcome::Skipped => "skipped",
        }
    }

    /// Terminal and non-failed; the run as a whole succeeds only if
    /// every entry lands here
    pub fn is_success(&self) -> bool {
        matches!(self, StackOutcome::Applied | StackOutcome::NoOp)
    }
}

impl std::fmt::Display for StackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result for one planned stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResult {
    pub stack: String,
    pub action: Action,
    pub outcome: StackOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall result of one orchestration run, in plan order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub graph_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub results: Vec<StackResult>,
}

impl RunReport {
    pub fn result(&self, stack: &str) -> Option<&StackResult> {
        self.results.iter().find(|r| r.stack == stack)
    }

    pub fn success(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.outcome.is_success())
    }
}
