//! Scripted provider adapter for tests

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::provider::{ApplyRequest, ApplyResponse, DestroyRequest, ResourceProviderAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Apply,
    Destroy,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: CallKind,
    pub stack: String,
    pub resource: String,
    pub kind: String,
}

/// In-memory adapter that echoes configuration fields back as resource
/// attributes and adds a generated `id`. Failures are injected per stack
/// or per `stack/resource`.
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<Vec<RecordedCall>>,
    apply_failures: Mutex<HashSet<String>>,
    destroy_failures: Mutex<HashSet<String>>,
    sequence: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `apply` for a stack (`"compute"`) or one resource
    /// (`"compute/instance"`)
    pub fn fail_apply(&self, key: &str) {
        self.apply_failures.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_destroy(&self, key: &str) {
        self.destroy_failures
            .lock()
            .unwrap()
            .insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.apply_failures.lock().unwrap().clear();
        self.destroy_failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stack: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.stack == stack)
            .collect()
    }

    fn is_scripted(&self, failures: &Mutex<HashSet<String>>, stack: &str, resource: &str) -> bool {
        let failures = failures.lock().unwrap();
        failures.contains(stack) || failures.contains(&format!("{stack}/{resource}"))
    }

    fn record(&self, op: CallKind, stack: &str, resource: &str, kind: &str) {
        self.calls.lock().unwrap().push(RecordedCall {
            op,
            stack: stack.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
        });
    }
}

#[async_trait]
impl ResourceProviderAdapter for MockProvider {
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse> {
        self.record(
            CallKind::Apply,
            &request.stack,
            &request.resource,
            &request.kind,
        );
        if self.is_scripted(&self.apply_failures, &request.stack, &request.resource) {
            bail!(
                "injected apply failure for '{}/{}'",
                request.stack,
                request.resource
            );
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut attributes: BTreeMap<String, Value> = match &request.config {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };
        attributes.insert(
            "id".to_string(),
            Value::String(format!("{}-{sequence}", request.kind.replace('/', "-"))),
        );
        Ok(ApplyResponse {
            fingerprint: format!("fp-{sequence}"),
            attributes,
        })
    }

    async fn destroy(&self, request: DestroyRequest) -> Result<()> {
        self.record(
            CallKind::Destroy,
            &request.stack,
            &request.resource,
            &request.kind,
        );
        if self.is_scripted(&self.destroy_failures, &request.stack, &request.resource) {
            bail!(
                "injected destroy failure for '{}/{}'",
                request.stack,
                request.resource
            );
        }
        Ok(())
    }
}
