//! Durable applied state
//!
//! One record per stack survives across runs and is the only durable
//! entity in the engine. Records are written exclusively by the executor
//! after a provider call returns; the planner reads them and nothing
//! else.

mod store;

pub use store::{JsonStateStore, StateStore};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current on-disk schema version. Bump when the record layout changes
/// and teach [`AppliedState::migrate`] to read the older shape.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Terminal status of the last run that touched a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackStatus {
    /// Last apply completed and outputs are trustworthy
    Applied,
    /// A provider call failed; the record holds whatever the provider
    /// confirmed before the failure
    Failed,
    /// Failed, then compensation removed the resources created in that
    /// run
    RolledBack,
    /// Failed, and compensation itself failed; resource state is
    /// undefined and needs manual inspection
    RollbackFailed,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Applied => "applied",
            StackStatus::Failed => "failed",
            StackStatus::RolledBack => "rolled-back",
            StackStatus::RollbackFailed => "rollback-failed",
        }
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last-applied record of one resource within a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResource {
    pub kind: String,
    /// Hash of the declared configuration, for planner diffing
    pub config_hash: String,
    /// Opaque provider fingerprint, passed back on update and destroy
    pub fingerprint: String,
}

/// Durable record of a stack's last application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedState {
    pub version: u32,
    pub graph_id: String,
    pub stack: String,
    pub run_id: String,
    pub status: StackStatus,
    pub inputs: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, AppliedResource>,
    pub outputs: BTreeMap<String, Value>,
    pub applied_at: DateTime<Utc>,
}

impl AppliedState {
    /// Bring an older record up to the current schema. Only one version
    /// exists today, so this is a compatibility check.
    pub fn migrate(self) -> Result<Self, StateError> {
        if self.version > STATE_SCHEMA_VERSION {
            return Err(StateError::IncompatibleVersion {
                stack: self.stack,
                found: self.version,
                supported: STATE_SCHEMA_VERSION,
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "state record for '{stack}' has schema version {found}, newest supported is {supported}"
    )]
    IncompatibleVersion {
        stack: String,
        found: u32,
        supported: u32,
    },
}
