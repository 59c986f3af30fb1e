//! Wave-based executor
//!
//! Processes plan entries in dependency order: deletions first
//! (consumers before producers), then creates and updates (producers
//! before consumers). Entries with no dependency relationship may run
//! concurrently up to the configured budget; a failure halts dispatch of
//! new entries while unrelated in-flight siblings finish.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::interpolate::interpolate;
use super::report::{RunReport, StackOutcome, StackResult};
use super::{CancelFlag, ExecError};
use crate::graph::StackGraph;
use crate::plan::{config_hash, Action, Plan};
use crate::provider::{ApplyRequest, DestroyRequest, ProviderRegistry};
use crate::stack::{BindingSource, StackDefinition};
use crate::state::{AppliedResource, AppliedState, StackStatus, StateStore, STATE_SCHEMA_VERSION};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently executing sibling stacks
    pub max_parallel: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

pub struct Executor {
    providers: ProviderRegistry,
    store: Arc<dyn StateStore>,
    config: ExecutorConfig,
    cancel: CancelFlag,
}

struct PhaseEntry {
    stack: String,
    action: Action,
    /// Stacks in the same phase that must finish first
    deps: BTreeSet<String>,
}

struct TaskOutput {
    stack: String,
    action: Action,
    outcome: StackOutcome,
    message: Option<String>,
    outputs: Option<BTreeMap<String, Value>>,
}

impl Executor {
    pub fn new(providers: ProviderRegistry, store: Arc<dyn StateStore>) -> Self {
        Self {
            providers,
            store,
            config: ExecutorConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a plan to completion. Failures never panic out of the
    /// executor; every planned entry lands in the report with a terminal
    /// outcome.
    pub async fn execute(
        &self,
        graph: &StackGraph,
        plan: &Plan,
        prior: &BTreeMap<String, AppliedState>,
    ) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            entries = plan.entries.len(),
            changes = plan.changes(),
            "executing plan"
        );

        let mut outputs: HashMap<String, BTreeMap<String, Value>> = HashMap::new();
        let mut results: BTreeMap<String, StackResult> = BTreeMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();
        let mut halted = false;

        let delete_set: BTreeSet<String> = plan
            .entries
            .iter()
            .filter(|e| e.action == Action::Delete)
            .map(|e| e.stack.clone())
            .collect();
        let apply_set: BTreeSet<String> = plan
            .entries
            .iter()
            .filter(|e| e.action != Action::Delete)
            .map(|e| e.stack.clone())
            .collect();

        // Deleting a producer must wait until its deleted consumers are
        // gone; applying a consumer must wait for its producers.
        let deletes: Vec<PhaseEntry> = plan
            .entries
            .iter()
            .filter(|e| e.action == Action::Delete)
            .map(|e| PhaseEntry {
                stack: e.stack.clone(),
                action: e.action,
                deps: graph
                    .consumers_of(&e.stack)
                    .intersection(&delete_set)
                    .cloned()
                    .collect(),
            })
            .collect();
        let applies: Vec<PhaseEntry> = plan
            .entries
            .iter()
            .filter(|e| e.action != Action::Delete)
            .map(|e| PhaseEntry {
                stack: e.stack.clone(),
                action: e.action,
                deps: graph
                    .producers_of(&e.stack)
                    .intersection(&apply_set)
                    .cloned()
                    .collect(),
            })
            .collect();

        for phase in [deletes, applies] {
            self.run_phase(
                phase,
                graph,
                prior,
                &run_id,
                &plan.graph_id,
                &mut outputs,
                &mut results,
                &mut failed,
                &mut skipped,
                &mut halted,
            )
            .await;
        }

        let results: Vec<StackResult> = plan
            .entries
            .iter()
            .filter_map(|e| results.remove(&e.stack))
            .collect();
        RunReport {
            run_id,
            graph_id: plan.graph_id.clone(),
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            results,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &self,
        entries: Vec<PhaseEntry>,
        graph: &StackGraph,
        prior: &BTreeMap<String, AppliedState>,
        run_id: &str,
        graph_id: &str,
        outputs: &mut HashMap<String, BTreeMap<String, Value>>,
        results: &mut BTreeMap<String, StackResult>,
        failed: &mut BTreeSet<String>,
        skipped: &mut BTreeSet<String>,
        halted: &mut bool,
    ) {
        let mut pending = entries;
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();

        loop {
            if !*halted && !self.cancel.is_cancelled() {
                self.dispatch_ready(
                    &mut pending,
                    &mut done,
                    &mut tasks,
                    graph,
                    prior,
                    run_id,
                    graph_id,
                    outputs,
                    results,
                    failed,
                    halted,
                );
            }

            let Some(joined) = tasks.join_next().await else {
                // Nothing in flight; anything still pending is blocked
                // or stopped and drains below.
                break;
            };
            match joined {
                Ok(output) => {
                    if output.outcome.is_success() {
                        done.insert(output.stack.clone());
                        if let Some(values) = &output.outputs {
                            outputs.insert(output.stack.clone(), values.clone());
                        }
                    } else {
                        failed.insert(output.stack.clone());
                        *halted = true;
                    }
                    results.insert(
                        output.stack.clone(),
                        StackResult {
                            stack: output.stack,
                            action: output.action,
                            outcome: output.outcome,
                            message: output.message,
                        },
                    );
                }
                Err(join_error) => {
                    warn!(error = %join_error, "executor task aborted");
                    *halted = true;
                }
            }
        }

        // Everything never dispatched is skipped, attributed to the
        // nearest failed or skipped upstream where one exists.
        for entry in pending {
            let message = if let Some(dep) = entry.deps.iter().find(|d| failed.contains(*d)) {
                format!("upstream '{dep}' failed")
            } else if let Some(dep) = entry.deps.iter().find(|d| skipped.contains(*d)) {
                format!("upstream '{dep}' skipped")
            } else if self.cancel.is_cancelled() {
                "run cancelled".to_string()
            } else {
                "halted after earlier failure".to_string()
            };
            skipped.insert(entry.stack.clone());
            results.insert(
                entry.stack.clone(),
                StackResult {
                    stack: entry.stack,
                    action: entry.action,
                    outcome: StackOutcome::Skipped,
                    message: Some(message),
                },
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_ready(
        &self,
        pending: &mut Vec<PhaseEntry>,
        done: &mut BTreeSet<String>,
        tasks: &mut JoinSet<TaskOutput>,
        graph: &StackGraph,
        prior: &BTreeMap<String, AppliedState>,
        run_id: &str,
        graph_id: &str,
        outputs: &mut HashMap<String, BTreeMap<String, Value>>,
        results: &mut BTreeMap<String, StackResult>,
        failed: &mut BTreeSet<String>,
        halted: &mut bool,
    ) {
        let mut index = 0;
        while index < pending.len() {
            if tasks.len() >= self.config.max_parallel {
                break;
            }
            if !pending[index].deps.is_subset(done) {
                index += 1;
                continue;
            }
            let entry = pending.remove(index);
            match entry.action {
                Action::NoOp => {
                    // Settled stacks publish their recorded outputs so
                    // dependents resolve against known-fresh values.
                    if let Some(state) = prior.get(&entry.stack) {
                        outputs.insert(entry.stack.clone(), state.outputs.clone());
                    }
                    results.insert(
                        entry.stack.clone(),
                        StackResult {
                            stack: entry.stack.clone(),
                            action: Action::NoOp,
                            outcome: StackOutcome::NoOp,
                            message: None,
                        },
                    );
                    debug!(stack = %entry.stack, "no-op");
                    done.insert(entry.stack);
                    // Completion may unblock earlier entries; rescan.
                    index = 0;
                    continue;
                }
                Action::Delete => {
                    let Some(state) = prior.get(&entry.stack) else {
                        // Nothing recorded; the delete is trivially done.
                        results.insert(
                            entry.stack.clone(),
                            StackResult {
                                stack: entry.stack.clone(),
                                action: Action::Delete,
                                outcome: StackOutcome::Applied,
                                message: Some("no state to remove".to_string()),
                            },
                        );
                        done.insert(entry.stack);
                        index = 0;
                        continue;
                    };
                    let providers = self.providers.clone();
                    let store = Arc::clone(&self.store);
                    let definition = graph.definition(&entry.stack).cloned();
                    let state = state.clone();
                    tasks.spawn(async move {
                        delete_stack(providers, store, definition, state).await
                    });
                }
                Action::Create | Action::Update => {
                    let definition = graph
                        .definition(&entry.stack)
                        .cloned()
                        .expect("active stacks are always declared");
                    match resolve_inputs(graph, &definition, outputs) {
                        Ok(inputs) => {
                            let providers = self.providers.clone();
                            let store = Arc::clone(&self.store);
                            let state = prior.get(&entry.stack).cloned();
                            let run_id = run_id.to_string();
                            let graph_id = graph_id.to_string();
                            let action = entry.action;
                            tasks.spawn(async move {
                                apply_stack(
                                    providers, store, definition, state, inputs, action, run_id,
                                    graph_id,
                                )
                                .await
                            });
                        }
                        Err(e) => {
                            warn!(stack = %entry.stack, error = %e, "input resolution failed");
                            failed.insert(entry.stack.clone());
                            *halted = true;
                            results.insert(
                                entry.stack.clone(),
                                StackResult {
                                    stack: entry.stack,
                                    action: entry.action,
                                    outcome: StackOutcome::Failed,
                                    message: Some(e.to_string()),
                                },
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Resolve a stack's final inputs from literals, defaults, and upstream
/// outputs captured in this run
fn resolve_inputs(
    graph: &StackGraph,
    definition: &StackDefinition,
    outputs: &HashMap<String, BTreeMap<String, Value>>,
) -> Result<BTreeMap<String, Value>, ExecError> {
    let mut inputs = BTreeMap::new();
    for param in &definition.parameters {
        match graph.binding(&definition.name, &param.name) {
            Some(BindingSource::Literal(value)) => {
                inputs.insert(param.name.clone(), value.clone());
            }
            Some(BindingSource::Output { producer, output }) => {
                let value = outputs
                    .get(producer)
                    .and_then(|values| values.get(output))
                    .ok_or_else(|| ExecError::MissingOutput {
                        stack: definition.name.clone(),
                        parameter: param.name.clone(),
                        producer: producer.clone(),
                        output: output.clone(),
                    })?;
                inputs.insert(param.name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &param.default {
                    inputs.insert(param.name.clone(), default.clone());
                }
            }
        }
    }
    Ok(inputs)
}

#[allow(clippy::too_many_arguments)]
async fn apply_stack(
    providers: ProviderRegistry,
    store: Arc<dyn StateStore>,
    definition: StackDefinition,
    prior: Option<AppliedState>,
    inputs: BTreeMap<String, Value>,
    action: Action,
    run_id: String,
    graph_id: String,
) -> TaskOutput {
    let stack = definition.name.clone();
    let fail = |message: String| TaskOutput {
        stack: stack.clone(),
        action,
        outcome: StackOutcome::Failed,
        message: Some(message),
        outputs: None,
    };

    // Unknown kinds fail the stack before any provider call.
    for resource in &definition.resources {
        if providers.adapter_for(&resource.kind).is_none() {
            let e = ExecError::UnknownKind {
                stack: stack.clone(),
                kind: resource.kind.clone(),
            };
            return fail(e.to_string());
        }
    }

    let mut resources: BTreeMap<String, AppliedResource> = prior
        .as_ref()
        .map(|p| p.resources.clone())
        .unwrap_or_default();
    let mut attributes: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    let mut created_this_run: Vec<String> = Vec::new();

    for resource in &definition.resources {
        let adapter = providers
            .adapter_for(&resource.kind)
            .expect("checked above");
        let previous = prior
            .as_ref()
            .and_then(|p| p.resources.get(&resource.name))
            .map(|r| r.fingerprint.clone());
        let request = ApplyRequest {
            stack: stack.clone(),
            resource: resource.name.clone(),
            kind: resource.kind.clone(),
            config: interpolate(&resource.config, &inputs),
            previous_fingerprint: previous.clone(),
        };
        debug!(stack = %stack, resource = %resource.name, kind = %resource.kind, "apply");
        match adapter.apply(request).await {
            Ok(response) => {
                if previous.is_none() {
                    created_this_run.push(resource.name.clone());
                }
                resources.insert(
                    resource.name.clone(),
                    AppliedResource {
                        kind: resource.kind.clone(),
                        config_hash: config_hash(&resource.config),
                        fingerprint: response.fingerprint,
                    },
                );
                attributes.insert(resource.name.clone(), response.attributes);
            }
            Err(source) => {
                let e = ExecError::Provider {
                    stack: stack.clone(),
                    resource: resource.name.clone(),
                    source,
                };
                return roll_back(
                    providers,
                    store,
                    definition,
                    prior,
                    inputs,
                    resources,
                    attributes,
                    created_this_run,
                    action,
                    run_id,
                    graph_id,
                    e,
                )
                .await;
            }
        }
    }

    let mut outs: BTreeMap<String, Value> = BTreeMap::new();
    for output in &definition.outputs {
        let Some(value) = attributes
            .get(&output.value.resource)
            .and_then(|a| a.get(&output.value.attribute))
        else {
            let e = ExecError::MissingAttribute {
                stack: stack.clone(),
                output: output.name.clone(),
                expr: output.value.to_string(),
            };
            let record = AppliedState {
                version: STATE_SCHEMA_VERSION,
                graph_id,
                stack: stack.clone(),
                run_id,
                status: StackStatus::Failed,
                inputs,
                resources,
                outputs: outs,
                applied_at: Utc::now(),
            };
            if let Err(save_error) = store.save(&record).await {
                warn!(stack = %stack, error = %save_error, "failed to persist state record");
            }
            return fail(e.to_string());
        };
        outs.insert(output.name.clone(), value.clone());
    }

    let record = AppliedState {
        version: STATE_SCHEMA_VERSION,
        graph_id,
        stack: stack.clone(),
        run_id,
        status: StackStatus::Applied,
        inputs,
        resources,
        outputs: outs.clone(),
        applied_at: Utc::now(),
    };
    if let Err(save_error) = store.save(&record).await {
        return fail(format!("applied, but persisting state failed: {save_error}"));
    }
    info!(stack = %stack, action = %action, "applied");
    TaskOutput {
        stack,
        action,
        outcome: StackOutcome::Applied,
        message: None,
        outputs: Some(outs),
    }
}

/// Persist the failed record, then compensate by destroying the
/// resources this run created. The pre-rollback record is saved first so
/// the partial state stays inspectable even if compensation fails.
#[allow(clippy::too_many_arguments)]
async fn roll_back(
    providers: ProviderRegistry,
    store: Arc<dyn StateStore>,
    definition: StackDefinition,
    prior: Option<AppliedState>,
    inputs: BTreeMap<String, Value>,
    mut resources: BTreeMap<String, AppliedResource>,
    attributes: BTreeMap<String, BTreeMap<String, Value>>,
    created_this_run: Vec<String>,
    action: Action,
    run_id: String,
    graph_id: String,
    cause: ExecError,
) -> TaskOutput {
    let stack = definition.name.clone();
    warn!(stack = %stack, error = %cause, "apply failed");

    // Outputs evaluable from the resources that did apply
    let partial_outputs: BTreeMap<String, Value> = definition
        .outputs
        .iter()
        .filter_map(|o| {
            attributes
                .get(&o.value.resource)
                .and_then(|a| a.get(&o.value.attribute))
                .map(|v| (o.name.clone(), v.clone()))
        })
        .collect();

    let mut record = AppliedState {
        version: STATE_SCHEMA_VERSION,
        graph_id,
        stack: stack.clone(),
        run_id,
        status: StackStatus::Failed,
        inputs,
        resources: resources.clone(),
        outputs: partial_outputs,
        applied_at: Utc::now(),
    };
    if let Err(save_error) = store.save(&record).await {
        warn!(stack = %stack, error = %save_error, "failed to persist pre-rollback record");
    }

    if created_this_run.is_empty() {
        return TaskOutput {
            stack,
            action,
            outcome: StackOutcome::Failed,
            message: Some(cause.to_string()),
            outputs: None,
        };
    }

    for name in created_this_run.iter().rev() {
        let Some(applied) = resources.get(name) else {
            continue;
        };
        let Some(adapter) = providers.adapter_for(&applied.kind) else {
            continue;
        };
        let request = DestroyRequest {
            stack: stack.clone(),
            resource: name.clone(),
            kind: applied.kind.clone(),
            fingerprint: applied.fingerprint.clone(),
        };
        debug!(stack = %stack, resource = %name, "rolling back");
        if let Err(source) = adapter.destroy(request).await {
            let rollback_error = ExecError::Rollback {
                stack: stack.clone(),
                resource: name.clone(),
                source,
            };
            warn!(stack = %stack, error = %rollback_error, "rollback failed");
            record.status = StackStatus::RollbackFailed;
            record.resources = resources.clone();
            if let Err(save_error) = store.save(&record).await {
                warn!(stack = %stack, error = %save_error, "failed to persist rollback-failed record");
            }
            return TaskOutput {
                stack,
                action,
                outcome: StackOutcome::RollbackFailed,
                message: Some(format!("{cause}; {rollback_error}")),
                outputs: None,
            };
        }
        resources.remove(name);
    }

    record.status = StackStatus::RolledBack;
    record.resources = resources;
    record.outputs = prior.map(|p| p.outputs).unwrap_or_default();
    if let Err(save_error) = store.save(&record).await {
        warn!(stack = %stack, error = %save_error, "failed to persist rolled-back record");
    }
    TaskOutput {
        stack,
        action,
        outcome: StackOutcome::RolledBack,
        message: Some(format!(
            "{cause}; rolled back {} created resource(s)",
            created_this_run.len()
        )),
        outputs: None,
    }
}

async fn delete_stack(
    providers: ProviderRegistry,
    store: Arc<dyn StateStore>,
    definition: Option<StackDefinition>,
    prior: AppliedState,
) -> TaskOutput {
    let stack = prior.stack.clone();
    let fail = |message: String| TaskOutput {
        stack: stack.clone(),
        action: Action::Delete,
        outcome: StackOutcome::Failed,
        message: Some(message),
        outputs: None,
    };

    for applied in prior.resources.values() {
        if providers.adapter_for(&applied.kind).is_none() {
            let e = ExecError::UnknownKind {
                stack: stack.clone(),
                kind: applied.kind.clone(),
            };
            return fail(e.to_string());
        }
    }

    // Reverse declaration order where the definition is still known;
    // records for undeclared stacks fall back to reverse name order.
    let order: Vec<String> = match &definition {
        Some(def) => {
            let declared: Vec<String> = def
                .resources
                .iter()
                .rev()
                .map(|r| r.name.clone())
                .filter(|n| prior.resources.contains_key(n))
                .collect();
            let extra = prior
                .resources
                .keys()
                .rev()
                .filter(|n| def.resource(n).is_none())
                .cloned();
            extra.chain(declared).collect()
        }
        None => prior.resources.keys().rev().cloned().collect(),
    };

    let mut remaining = prior.resources.clone();
    for name in order {
        let Some(applied) = remaining.get(&name).cloned() else {
            continue;
        };
        let adapter = providers
            .adapter_for(&applied.kind)
            .expect("checked above");
        let request = DestroyRequest {
            stack: stack.clone(),
            resource: name.clone(),
            kind: applied.kind.clone(),
            fingerprint: applied.fingerprint.clone(),
        };
        debug!(stack = %stack, resource = %name, "destroy");
        if let Err(source) = adapter.destroy(request).await {
            let e = ExecError::Provider {
                stack: stack.clone(),
                resource: name.clone(),
                source,
            };
            warn!(stack = %stack, error = %e, "destroy failed");
            let record = AppliedState {
                status: StackStatus::Failed,
                resources: remaining,
                applied_at: Utc::now(),
                ..prior
            };
            if let Err(save_error) = store.save(&record).await {
                warn!(stack = %stack, error = %save_error, "failed to persist state record");
            }
            return fail(e.to_string());
        }
        remaining.remove(&name);
    }

    if let Err(e) = store.delete(&stack).await {
        return fail(format!("destroyed, but removing state failed: {e}"));
    }
    info!(stack = %stack, "destroyed");
    TaskOutput {
        stack,
        action: Action::Delete,
        outcome: StackOutcome::Applied,
        message: None,
        outputs: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_resolve_inputs_prefers_run_outputs() {
        let all: BTreeSet<String> = ["network", "compute", "database"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (defs, bindings) = fixtures::three_stack_pipeline();
        let graph = StackGraph::build(defs, bindings, &all).unwrap();
        let compute = graph.definition("compute").unwrap();

        let outputs = HashMap::from([(
            "network".to_string(),
            BTreeMap::from([
                ("subnet_id".to_string(), serde_json::json!("subnet-fresh")),
                ("subnet2_id".to_string(), serde_json::json!("subnet2-fresh")),
            ]),
        )]);
        let inputs = resolve_inputs(&graph, compute, &outputs).unwrap();
        assert_eq!(inputs["subnet_id"], serde_json::json!("subnet-fresh"));
    }

    #[test]
    fn test_resolve_inputs_missing_output_is_an_error() {
        let all: BTreeSet<String> = ["network", "compute", "database"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (defs, bindings) = fixtures::three_stack_pipeline();
        let graph = StackGraph::build(defs, bindings, &all).unwrap();
        let compute = graph.definition("compute").unwrap();

        let err = resolve_inputs(&graph, compute, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ExecError::MissingOutput { .. }));
    }
}
