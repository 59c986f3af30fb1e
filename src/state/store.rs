//! State store implementations
//!
//! The JSON store keeps one record per stack under a directory keyed by
//! graph identity. Writes go through a temp file and an atomic rename so
//! a reader never observes a half-written record. Single-writer
//! discipline is assumed; serializing concurrent runs is an external
//! concern.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{AppliedState, StateError};

/// Persistence contract for applied state records
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, stack: &str) -> Result<Option<AppliedState>, StateError>;

    async fn save(&self, state: &AppliedState) -> Result<(), StateError>;

    async fn delete(&self, stack: &str) -> Result<(), StateError>;

    async fn list(&self) -> Result<Vec<AppliedState>, StateError>;
}

/// Durable JSON-file store, one file per stack id
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    /// Open (creating if needed) the state directory for one graph
    pub fn open(root: &Path, graph_id: &str) -> Result<Self, StateError> {
        let dir = root.join(graph_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, stack: &str) -> Result<Option<AppliedState>, StateError> {
        let path = self.record_path(stack);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: AppliedState = serde_json::from_str(&content)?;
        Ok(Some(state.migrate()?))
    }

    async fn save(&self, state: &AppliedState) -> Result<(), StateError> {
        let path = self.record_path(&state.stack);
        let temp = self.dir.join(format!("{}.json.tmp", state.stack));
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&temp, json).await?;
        fs::rename(&temp, &path).await?;
        debug!(stack = %state.stack, status = %state.status, "saved state record");
        Ok(())
    }

    async fn delete(&self, stack: &str) -> Result<(), StateError> {
        match fs::remove_file(self.record_path(stack)).await {
            Ok(()) => {
                debug!(stack, "deleted state record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<AppliedState>, StateError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            let state: AppliedState = serde_json::from_str(&content)?;
            records.push(state.migrate()?);
        }
        records.sort_by(|a, b| a.stack.cmp(&b.stack));
        Ok(records)
    }
}
