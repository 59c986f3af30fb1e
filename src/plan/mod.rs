//! Planning: decide per-stack actions for one orchestration run
//!
//! The planner is a pure pass over the validated graph and the prior
//! applied state. It performs no I/O and never mutates state; its output
//! is an ephemeral [`Plan`] consumed once by the executor.

mod planner;

pub use planner::Planner;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Action planned for one stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::NoOp => "no-op",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a plan, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStack {
    pub stack: String,
    pub action: Action,
    /// Human-readable cause of the action, surfaced in plan output
    pub reason: String,
}

/// Ordered sequence of per-stack actions for one run. Deletions come
/// first in reverse dependency order, then creates/updates producers
/// before consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub graph_id: String,
    pub entries: Vec<PlannedStack>,
}

impl Plan {
    pub fn entry(&self, stack: &str) -> Option<&PlannedStack> {
        self.entries.iter().find(|e| e.stack == stack)
    }

    /// True when nothing needs a provider call
    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|e| e.action == Action::NoOp)
    }

    pub fn changes(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_change()).count()
    }
}

/// Content hash of a declared resource configuration, used for change
/// detection against the last applied record
pub fn config_hash(config: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(config).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}
