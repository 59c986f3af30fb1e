//! Action computation against the last applied state

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;

use super::{Action, Plan, PlannedStack};
use crate::graph::StackGraph;
use crate::stack::BindingSource;
use crate::state::{AppliedState, StackStatus};

/// Computes a [`Plan`] from the validated graph, the prior applied state
/// and the desired active set. Read-only with respect to both inputs.
pub struct Planner<'a> {
    graph: &'a StackGraph,
}

impl<'a> Planner<'a> {
    pub fn new(graph: &'a StackGraph) -> Self {
        Self { graph }
    }

    pub fn plan(
        &self,
        prior: &BTreeMap<String, AppliedState>,
        active: &BTreeSet<String>,
    ) -> Plan {
        let mut entries = self.plan_deletes(prior, active);

        // Create/update pass in topological order so that a producer's
        // planned action is known before its consumers are considered.
        let mut planned: BTreeMap<String, Action> = BTreeMap::new();
        for stack in self.graph.topo_order() {
            if !active.contains(stack) {
                continue;
            }
            let entry = match prior.get(stack) {
                None => PlannedStack {
                    stack: stack.clone(),
                    action: Action::Create,
                    reason: "not previously applied".to_string(),
                },
                Some(state) => self.diff_stack(stack, state, prior, &planned),
            };
            debug!(stack = %entry.stack, action = %entry.action, reason = %entry.reason, "planned");
            planned.insert(stack.clone(), entry.action);
            entries.push(entry);
        }

        Plan {
            graph_id: self.graph.identity(),
            entries,
        }
    }

    /// Stacks with applied state that left the active set are deleted,
    /// consumers before producers. Records for stacks no longer declared
    /// at all have no known dependents and go first.
    fn plan_deletes(
        &self,
        prior: &BTreeMap<String, AppliedState>,
        active: &BTreeSet<String>,
    ) -> Vec<PlannedStack> {
        let mut undeclared: Vec<&String> = prior
            .keys()
            .filter(|s| !active.contains(*s) && !self.graph.contains(s))
            .collect();
        undeclared.sort();

        let declared = self
            .graph
            .topo_order()
            .iter()
            .rev()
            .filter(|s| !active.contains(*s) && prior.contains_key(*s));

        undeclared
            .into_iter()
            .chain(declared)
            .map(|stack| PlannedStack {
                stack: stack.clone(),
                action: Action::Delete,
                reason: "removed from active set".to_string(),
            })
            .collect()
    }

    fn diff_stack(
        &self,
        stack: &str,
        state: &AppliedState,
        prior: &BTreeMap<String, AppliedState>,
        planned: &BTreeMap<String, Action>,
    ) -> PlannedStack {
        let update = |reason: String| PlannedStack {
            stack: stack.to_string(),
            action: Action::Update,
            reason,
        };

        if state.status != StackStatus::Applied {
            return update(format!("previous run ended {}", state.status));
        }

        // Conservative cascade: a changed producer may change this
        // stack's bound inputs once it re-applies, so never NoOp below
        // a planned create or update.
        for producer in self.graph.producers_of(stack) {
            if let Some(action) = planned.get(&producer) {
                if action.is_change() {
                    return update(format!("upstream '{producer}' planned {action}"));
                }
            }
        }

        if let Some(reason) = self.resource_drift(stack, state) {
            return update(reason);
        }
        if let Some(reason) = self.input_drift(stack, state, prior) {
            return update(reason);
        }

        PlannedStack {
            stack: stack.to_string(),
            action: Action::NoOp,
            reason: "unchanged".to_string(),
        }
    }

    /// Compare declared resources against the applied record: kinds,
    /// configuration hashes, and the resource set itself
    fn resource_drift(&self, stack: &str, state: &AppliedState) -> Option<String> {
        let def = self.graph.definition(stack)?;
        if def.resources.len() != state.resources.len() {
            return Some("resource set changed".to_string());
        }
        for resource in &def.resources {
            let Some(applied) = state.resources.get(&resource.name) else {
                return Some(format!("resource '{}' added", resource.name));
            };
            if applied.kind != resource.kind {
                return Some(format!("resource '{}' kind changed", resource.name));
            }
            if applied.config_hash != super::config_hash(&resource.config) {
                return Some(format!("resource '{}' configuration changed", resource.name));
            }
        }
        None
    }

    /// Compare the inputs a NoOp-producer world would resolve to against
    /// the inputs actually used last time. Producers planned for change
    /// were already handled by the cascade rule, so every bound value
    /// here comes from a settled applied record.
    fn input_drift(
        &self,
        stack: &str,
        state: &AppliedState,
        prior: &BTreeMap<String, AppliedState>,
    ) -> Option<String> {
        let def = self.graph.definition(stack)?;
        for param in &def.parameters {
            let resolved = match self.graph.binding(stack, &param.name) {
                Some(BindingSource::Literal(value)) => Some(value.clone()),
                Some(BindingSource::Output { producer, output }) => {
                    match prior.get(producer).and_then(|p| p.outputs.get(output)) {
                        Some(value) => Some(value.clone()),
                        // Producer never recorded this output; force a
                        // re-apply so resolution happens at execution.
                        None => return Some(format!(
                            "bound input '{}' not yet produced by '{producer}'",
                            param.name
                        )),
                    }
                }
                None => param.default.clone(),
            };
            if resolved.as_ref() != state.inputs.get(&param.name) {
                return Some(format!("input '{}' changed", param.name));
            }
        }
        for recorded in state.inputs.keys() {
            if def.parameter(recorded).is_none() {
                return Some(format!("parameter '{recorded}' no longer declared"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StackGraph;
    use crate::testing::fixtures;
    use serde_json::json;

    fn active(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn pipeline_graph(active_set: &BTreeSet<String>) -> StackGraph {
        let (defs, bindings) = fixtures::three_stack_pipeline();
        StackGraph::build(defs, bindings, active_set).unwrap()
    }

    #[test]
    fn test_first_run_plans_creates_in_topo_order() {
        let all = active(&["network", "compute", "database"]);
        let graph = pipeline_graph(&all);
        let plan = Planner::new(&graph).plan(&BTreeMap::new(), &all);

        let order: Vec<_> = plan.entries.iter().map(|e| e.stack.as_str()).collect();
        assert_eq!(order, ["network", "compute", "database"]);
        assert!(plan.entries.iter().all(|e| e.action == Action::Create));
    }

    #[test]
    fn test_identical_state_plans_all_noop() {
        let all = active(&["network", "compute", "database"]);
        let graph = pipeline_graph(&all);
        let prior = fixtures::settled_pipeline_state(&graph);
        let plan = Planner::new(&graph).plan(&prior, &all);

        assert!(plan.is_noop(), "expected all-NoOp plan: {:?}", plan.entries);
        assert_eq!(plan.changes(), 0);
    }

    #[test]
    fn test_leaf_config_change_cascades_to_all_dependents() {
        let all = active(&["network", "compute", "database"]);
        let (mut defs, bindings) = fixtures::three_stack_pipeline();
        defs.iter_mut()
            .find(|d| d.name == "network")
            .unwrap()
            .resources[0]
            .config = json!({"cidr": "172.16.0.0/12"});
        let graph = StackGraph::build(defs, bindings, &all).unwrap();

        // Prior state still matches the *old* configuration
        let settled = {
            let (old_defs, old_bindings) = fixtures::three_stack_pipeline();
            let old_graph = StackGraph::build(old_defs, old_bindings, &all).unwrap();
            fixtures::settled_pipeline_state(&old_graph)
        };
        let plan = Planner::new(&graph).plan(&settled, &all);

        assert_eq!(plan.entry("network").unwrap().action, Action::Update);
        assert_eq!(plan.entry("compute").unwrap().action, Action::Update);
        assert_eq!(plan.entry("database").unwrap().action, Action::Update);
        assert!(plan
            .entry("database")
            .unwrap()
            .reason
            .contains("upstream"));
    }

    #[test]
    fn test_literal_input_change_plans_update() {
        let all = active(&["network", "compute", "database"]);
        let (defs, mut bindings) = fixtures::three_stack_pipeline();
        bindings
            .iter_mut()
            .filter(|b| b.consumer == "network" && b.parameter == "cidr")
            .for_each(|b| {
                b.source = crate::stack::BindingSource::Literal(json!("10.99.0.0/16"));
            });
        let graph = StackGraph::build(defs, bindings, &all).unwrap();
        let settled = {
            let (old_defs, old_bindings) = fixtures::three_stack_pipeline();
            let old_graph = StackGraph::build(old_defs, old_bindings, &all).unwrap();
            fixtures::settled_pipeline_state(&old_graph)
        };
        let plan = Planner::new(&graph).plan(&settled, &all);

        let network = plan.entry("network").unwrap();
        assert_eq!(network.action, Action::Update);
        assert!(network.reason.contains("input"));
    }

    #[test]
    fn test_removed_stack_planned_delete_first() {
        // Teardown of the whole pipeline: deletes run consumers-first
        let graph = pipeline_graph(&active(&["network", "compute", "database"]));
        let prior = fixtures::settled_pipeline_state(&graph);
        let plan = Planner::new(&graph).plan(&prior, &BTreeSet::new());

        let order: Vec<_> = plan.entries.iter().map(|e| e.stack.as_str()).collect();
        assert_eq!(order, ["database", "compute", "network"]);
        assert!(plan.entries.iter().all(|e| e.action == Action::Delete));
    }

    #[test]
    fn test_failed_prior_state_is_replanned() {
        let all = active(&["network", "compute", "database"]);
        let graph = pipeline_graph(&all);
        let mut prior = fixtures::settled_pipeline_state(&graph);
        prior.get_mut("compute").unwrap().status = StackStatus::Failed;
        let plan = Planner::new(&graph).plan(&prior, &all);

        assert_eq!(plan.entry("network").unwrap().action, Action::NoOp);
        assert_eq!(plan.entry("compute").unwrap().action, Action::Update);
        // Database sits downstream of the re-applied stack
        assert_eq!(plan.entry("database").unwrap().action, Action::Update);
    }

    #[test]
    fn test_undeclared_state_record_is_deleted() {
        let all = active(&["network", "compute", "database"]);
        let graph = pipeline_graph(&all);
        let mut prior = fixtures::settled_pipeline_state(&graph);
        let mut orphan = prior.get("network").unwrap().clone();
        orphan.stack = "legacy".to_string();
        prior.insert("legacy".to_string(), orphan);

        let plan = Planner::new(&graph).plan(&prior, &all);
        let legacy = plan.entry("legacy").unwrap();
        assert_eq!(legacy.action, Action::Delete);
        assert_eq!(plan.entries[0].stack, "legacy");
    }
}
