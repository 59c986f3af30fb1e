//! Graph builder: definitions + bindings -> validated DAG

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use sha2::{Digest, Sha256};

use super::error::{GraphError, GraphErrors};
use crate::stack::{BindingSource, ParameterBinding, StackDefinition, ValueType};

/// Validated set of stack definitions plus the producer->consumer
/// dependency graph induced by their bindings
#[derive(Debug)]
pub struct StackGraph {
    definitions: BTreeMap<String, StackDefinition>,
    bindings: BTreeMap<String, BTreeMap<String, BindingSource>>,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    topo: Vec<String>,
}

impl StackGraph {
    /// Build and validate the graph. `active` is the desired active set;
    /// bindings from an active consumer to an inactive producer are
    /// unresolved references, since the producer is going away while the
    /// consumer still needs its outputs.
    pub fn build(
        definitions: Vec<StackDefinition>,
        bindings: Vec<ParameterBinding>,
        active: &BTreeSet<String>,
    ) -> Result<Self, GraphErrors> {
        let mut violations = Vec::new();

        let mut defs: BTreeMap<String, StackDefinition> = BTreeMap::new();
        for def in definitions {
            if defs.contains_key(&def.name) {
                violations.push(GraphError::DuplicateStack {
                    name: def.name.clone(),
                });
            } else {
                defs.insert(def.name.clone(), def);
            }
        }

        let mut by_consumer: BTreeMap<String, BTreeMap<String, BindingSource>> = BTreeMap::new();
        for binding in &bindings {
            validate_binding(&defs, active, binding, &mut violations);
            by_consumer
                .entry(binding.consumer.clone())
                .or_default()
                .insert(binding.parameter.clone(), binding.source.clone());
        }

        for (name, def) in &defs {
            if !active.contains(name) {
                continue;
            }
            let bound = by_consumer.get(name);
            for param in &def.parameters {
                let has_binding = bound.is_some_and(|b| b.contains_key(&param.name));
                if param.required && param.default.is_none() && !has_binding {
                    violations.push(GraphError::UnboundParameter {
                        stack: name.clone(),
                        parameter: param.name.clone(),
                    });
                }
            }
        }

        let (graph, indices) = build_digraph(&defs, &bindings);
        collect_cycles(&graph, &mut violations);

        if !violations.is_empty() {
            return Err(GraphErrors { violations });
        }

        let topo = stable_topo_order(&graph, &indices);
        Ok(Self {
            definitions: defs,
            bindings: by_consumer,
            graph,
            indices,
            topo,
        })
    }

    pub fn definition(&self, name: &str) -> Option<&StackDefinition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &StackDefinition> {
        self.definitions.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Binding source for one parameter, if any
    pub fn binding(&self, consumer: &str, parameter: &str) -> Option<&BindingSource> {
        self.bindings.get(consumer)?.get(parameter)
    }

    /// All bindings of one consumer, keyed by parameter name
    pub fn bindings_of(&self, consumer: &str) -> Option<&BTreeMap<String, BindingSource>> {
        self.bindings.get(consumer)
    }

    /// Direct upstream producers of a stack
    pub fn producers_of(&self, stack: &str) -> BTreeSet<String> {
        let Some(&idx) = self.indices.get(stack) else {
            return BTreeSet::new();
        };
        self.graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| self.graph[e.source()].clone())
            .collect()
    }

    /// Direct downstream consumers of a stack
    pub fn consumers_of(&self, stack: &str) -> BTreeSet<String> {
        let Some(&idx) = self.indices.get(stack) else {
            return BTreeSet::new();
        };
        self.graph
            .edges_directed(idx, petgraph::Direction::Outgoing)
            .map(|e| self.graph[e.target()].clone())
            .collect()
    }

    /// Every stack reachable downstream of `stack`, excluding itself
    pub fn transitive_consumers(&self, stack: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![stack.to_string()];
        while let Some(current) = frontier.pop() {
            for next in self.consumers_of(&current) {
                if seen.insert(next.clone()) {
                    frontier.push(next);
                }
            }
        }
        seen
    }

    /// Topological order over all defined stacks, producers first; ties
    /// broken by stack id ascending so plans are reproducible
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    /// Stable identity of this graph, used to key persisted state. Hashes
    /// the sorted stack-name set so the identity survives configuration
    /// edits within the same graph.
    pub fn identity(&self) -> String {
        identity_of(self.definitions.keys().map(String::as_str))
    }
}

/// Graph identity from a stack-name set alone, for callers that need to
/// locate persisted state without a fully validated graph
pub fn identity_of<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let sorted: BTreeSet<&str> = names.collect();
    let mut hasher = Sha256::new();
    for name in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn validate_binding(
    defs: &BTreeMap<String, StackDefinition>,
    active: &BTreeSet<String>,
    binding: &ParameterBinding,
    violations: &mut Vec<GraphError>,
) {
    let Some(consumer) = defs.get(&binding.consumer) else {
        violations.push(GraphError::UnresolvedReference {
            consumer: binding.consumer.clone(),
            parameter: binding.parameter.clone(),
            reference: format!("stack '{}'", binding.consumer),
        });
        return;
    };

    let Some(param) = consumer.parameter(&binding.parameter) else {
        violations.push(GraphError::UnresolvedReference {
            consumer: binding.consumer.clone(),
            parameter: binding.parameter.clone(),
            reference: format!("parameter '{}.{}'", binding.consumer, binding.parameter),
        });
        return;
    };

    match &binding.source {
        BindingSource::Literal(value) => match ValueType::of_value(value) {
            Some(found) if found == param.value_type => {}
            other => violations.push(GraphError::TypeMismatch {
                consumer: binding.consumer.clone(),
                parameter: binding.parameter.clone(),
                expected: param.value_type,
                found: other.map_or_else(|| "null".to_string(), |t| t.to_string()),
                source_ref: "literal".to_string(),
            }),
        },
        BindingSource::Output { producer, output } => {
            let Some(producer_def) = defs.get(producer) else {
                violations.push(GraphError::UnresolvedReference {
                    consumer: binding.consumer.clone(),
                    parameter: binding.parameter.clone(),
                    reference: format!("producer stack '{producer}'"),
                });
                return;
            };
            let Some(output_decl) = producer_def.output(output) else {
                violations.push(GraphError::UnresolvedReference {
                    consumer: binding.consumer.clone(),
                    parameter: binding.parameter.clone(),
                    reference: format!("output '{producer}.{output}'"),
                });
                return;
            };
            if active.contains(&binding.consumer) && !active.contains(producer) {
                violations.push(GraphError::UnresolvedReference {
                    consumer: binding.consumer.clone(),
                    parameter: binding.parameter.clone(),
                    reference: format!("output '{producer}.{output}' (producer not in active set)"),
                });
                return;
            }
            if output_decl.value_type != param.value_type {
                violations.push(GraphError::TypeMismatch {
                    consumer: binding.consumer.clone(),
                    parameter: binding.parameter.clone(),
                    expected: param.value_type,
                    found: output_decl.value_type.to_string(),
                    source_ref: format!("{producer}.{output}"),
                });
            }
        }
    }
}

fn build_digraph(
    defs: &BTreeMap<String, StackDefinition>,
    bindings: &[ParameterBinding],
) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    for name in defs.keys() {
        let idx = graph.add_node(name.clone());
        indices.insert(name.clone(), idx);
    }
    let mut seen_edges = BTreeSet::new();
    for binding in bindings {
        if let BindingSource::Output { producer, .. } = &binding.source {
            let (Some(&from), Some(&to)) =
                (indices.get(producer), indices.get(&binding.consumer))
            else {
                continue;
            };
            if seen_edges.insert((producer.clone(), binding.consumer.clone())) {
                graph.add_edge(from, to, ());
            }
        }
    }
    (graph, indices)
}

/// Report every strongly connected component of size > 1, plus
/// self-referential bindings, as cycles with their full path
fn collect_cycles(graph: &DiGraph<String, ()>, violations: &mut Vec<GraphError>) {
    for idx in graph.node_indices() {
        if graph.find_edge(idx, idx).is_some() {
            let name = graph[idx].clone();
            violations.push(GraphError::CyclicDependency {
                cycle: vec![name.clone(), name],
            });
        }
    }

    for component in petgraph::algo::tarjan_scc(graph) {
        if component.len() < 2 {
            continue;
        }
        let members: BTreeSet<NodeIndex> = component.iter().copied().collect();
        // Reconstruct a concrete path through the component, anchored at
        // the lexically smallest member for determinism: BFS from the
        // anchor within the component, then close the loop through any
        // member with an edge back to the anchor.
        let start = component
            .iter()
            .copied()
            .min_by(|a, b| graph[*a].cmp(&graph[*b]))
            .expect("non-empty component");
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for edge in graph.edges(current) {
                let target = edge.target();
                if members.contains(&target)
                    && target != start
                    && !parent.contains_key(&target)
                {
                    parent.insert(target, current);
                    queue.push_back(target);
                }
            }
        }
        let closer = members
            .iter()
            .copied()
            .filter(|&m| graph.find_edge(m, start).is_some())
            .min_by(|a, b| graph[*a].cmp(&graph[*b]))
            .expect("scc has an edge back to its anchor");
        let mut rev = vec![closer];
        let mut current = closer;
        while current != start {
            current = parent[&current];
            rev.push(current);
        }
        rev.reverse();
        let mut path: Vec<String> = rev.into_iter().map(|idx| graph[idx].clone()).collect();
        path.push(graph[start].clone());
        violations.push(GraphError::CyclicDependency { cycle: path });
    }
}

/// Kahn's algorithm with a sorted ready set: among stacks whose producers
/// are all ordered, the smallest id goes first
fn stable_topo_order(
    graph: &DiGraph<String, ()>,
    indices: &HashMap<String, NodeIndex>,
) -> Vec<String> {
    let mut indegree: BTreeMap<String, usize> = BTreeMap::new();
    for (name, &idx) in indices {
        indegree.insert(
            name.clone(),
            graph
                .edges_directed(idx, petgraph::Direction::Incoming)
                .count(),
        );
    }

    let mut ready: BTreeSet<String> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| n.clone())
        .collect();
    let mut order = Vec::with_capacity(indices.len());

    while let Some(name) = ready.iter().next().cloned() {
        ready.remove(&name);
        let idx = indices[&name];
        for edge in graph.edges_directed(idx, petgraph::Direction::Outgoing) {
            let target = &graph[edge.target()];
            let degree = indegree.get_mut(target).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(target.clone());
            }
        }
        order.push(name);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn active(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_three_stack_pipeline_topo_order() {
        let (defs, bindings) = fixtures::three_stack_pipeline();
        let graph = StackGraph::build(defs, bindings, &active(&["network", "compute", "database"]))
            .unwrap();
        assert_eq!(graph.topo_order(), ["network", "compute", "database"]);
    }

    #[test]
    fn test_topo_order_breaks_ties_by_id() {
        let defs = vec![
            fixtures::leaf_stack("zeta"),
            fixtures::leaf_stack("alpha"),
            fixtures::leaf_stack("mid"),
        ];
        let graph = StackGraph::build(defs, vec![], &active(&["zeta", "alpha", "mid"])).unwrap();
        assert_eq!(graph.topo_order(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_unresolved_producer_reference() {
        let (defs, mut bindings) = fixtures::three_stack_pipeline();
        bindings.push(crate::stack::ParameterBinding::output(
            "database", "port", "missing", "port",
        ));
        let err = StackGraph::build(defs, bindings, &active(&["network", "compute", "database"]))
            .unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            GraphError::UnresolvedReference { consumer, .. } if consumer == "database"
        )));
    }

    #[test]
    fn test_inactive_producer_is_unresolved() {
        let (defs, bindings) = fixtures::three_stack_pipeline();
        let err =
            StackGraph::build(defs, bindings, &active(&["network", "database"])).unwrap_err();
        let unresolved: Vec<_> = err
            .violations
            .iter()
            .filter(|v| matches!(v, GraphError::UnresolvedReference { .. }))
            .collect();
        assert!(!unresolved.is_empty(), "expected unresolved reference: {err}");
    }

    #[test]
    fn test_type_mismatch_on_output_binding() {
        let (mut defs, bindings) = fixtures::three_stack_pipeline();
        // Declare compute.subnet_id as int while network.subnet_id is string
        let compute = defs.iter_mut().find(|d| d.name == "compute").unwrap();
        compute
            .parameters
            .iter_mut()
            .find(|p| p.name == "subnet_id")
            .unwrap()
            .value_type = ValueType::Int;
        let err = StackGraph::build(defs, bindings, &active(&["network", "compute", "database"]))
            .unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, GraphError::TypeMismatch { .. })));
    }

    #[test]
    fn test_cycle_detection_reports_full_path() {
        let (defs, bindings) = fixtures::two_stack_cycle();
        let err = StackGraph::build(defs, bindings, &active(&["a", "b"])).unwrap_err();
        let cycle = err
            .violations
            .iter()
            .find_map(|v| match v {
                GraphError::CyclicDependency { cycle } => Some(cycle.clone()),
                _ => None,
            })
            .expect("cycle violation");
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3, "path should close the loop: {cycle:?}");
    }

    #[test]
    fn test_unbound_required_parameter() {
        let mut def = fixtures::leaf_stack("solo");
        def.parameters.push(crate::stack::ParameterSpec {
            name: "needed".to_string(),
            value_type: ValueType::String,
            required: true,
            default: None,
        });
        let err = StackGraph::build(vec![def], vec![], &active(&["solo"])).unwrap_err();
        assert_eq!(
            err.violations,
            vec![GraphError::UnboundParameter {
                stack: "solo".to_string(),
                parameter: "needed".to_string(),
            }]
        );
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let (mut defs, mut bindings) = fixtures::three_stack_pipeline();
        defs.push(fixtures::leaf_stack("network")); // duplicate
        bindings.push(crate::stack::ParameterBinding::output(
            "database", "port", "missing", "port",
        ));
        let err = StackGraph::build(defs, bindings, &active(&["network", "compute", "database"]))
            .unwrap_err();
        assert!(err.len() >= 2, "expected every violation reported: {err}");
    }

    #[test]
    fn test_duplicate_stack_rejected() {
        let defs = vec![fixtures::leaf_stack("dup"), fixtures::leaf_stack("dup")];
        let err = StackGraph::build(defs, vec![], &active(&["dup"])).unwrap_err();
        assert!(matches!(
            err.violations[0],
            GraphError::DuplicateStack { .. }
        ));
    }

    #[test]
    fn test_identity_ignores_configuration_content() {
        let (defs, bindings) = fixtures::three_stack_pipeline();
        let all = active(&["network", "compute", "database"]);
        let a = StackGraph::build(defs.clone(), bindings.clone(), &all).unwrap();

        let mut changed = defs;
        changed[0].resources[0].config = serde_json::json!({"cidr": "192.168.0.0/16"});
        let b = StackGraph::build(changed, bindings, &all).unwrap();
        assert_eq!(a.identity(), b.identity());
    }
}
