//! Shared graph fixtures
//!
//! The three-stack pipeline mirrors a typical network -> compute ->
//! database layout and is the canonical scenario across the test suite.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;

use crate::graph::StackGraph;
use crate::plan::config_hash;
use crate::stack::{
    OutputDecl, OutputExpr, ParameterBinding, ParameterSpec, ResourceDecl, StackDefinition,
    ValueType,
};
use crate::state::{AppliedResource, AppliedState, StackStatus, STATE_SCHEMA_VERSION};

fn param(name: &str, value_type: ValueType) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        value_type,
        required: true,
        default: None,
    }
}

fn resource(name: &str, kind: &str, config: serde_json::Value) -> ResourceDecl {
    ResourceDecl {
        name: name.to_string(),
        kind: kind.to_string(),
        config,
    }
}

fn output(name: &str, value_type: ValueType, resource: &str, attribute: &str) -> OutputDecl {
    OutputDecl {
        name: name.to_string(),
        value_type,
        value: OutputExpr {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        },
    }
}

/// Network -> compute -> database, with database also bound straight to
/// the network. All parameter wiring goes through output bindings except
/// the network CIDR literal.
pub fn three_stack_pipeline() -> (Vec<StackDefinition>, Vec<ParameterBinding>) {
    let network = StackDefinition {
        name: "network".to_string(),
        parameters: vec![param("cidr", ValueType::String)],
        resources: vec![
            resource("vpc", "network/vpc", json!({"cidr": "${param.cidr}"})),
            resource(
                "subnets",
                "network/subnet",
                json!({"primary": "10.0.1.0/24", "secondary": "10.0.2.0/24"}),
            ),
        ],
        outputs: vec![
            output("subnet_id", ValueType::String, "subnets", "id"),
            output("subnet2_id", ValueType::String, "subnets", "secondary"),
        ],
    };
    let compute = StackDefinition {
        name: "compute".to_string(),
        parameters: vec![param("subnet_id", ValueType::String)],
        resources: vec![
            resource(
                "sg",
                "compute/security-group",
                json!({"ingress": "10.0.0.0/16"}),
            ),
            resource(
                "instance",
                "compute/instance",
                json!({"subnet": "${param.subnet_id}", "size": "m1"}),
            ),
        ],
        outputs: vec![output("security_group_id", ValueType::String, "sg", "id")],
    };
    let database = StackDefinition {
        name: "database".to_string(),
        parameters: vec![
            param("security_group_id", ValueType::String),
            param("subnet2_id", ValueType::String),
        ],
        resources: vec![resource(
            "db",
            "database/instance",
            json!({
                "engine": "postgres",
                "subnet": "${param.subnet2_id}",
                "security_group": "${param.security_group_id}"
            }),
        )],
        outputs: vec![output("endpoint", ValueType::String, "db", "id")],
    };

    let bindings = vec![
        ParameterBinding::literal("network", "cidr", json!("10.0.0.0/16")),
        ParameterBinding::output("compute", "subnet_id", "network", "subnet_id"),
        ParameterBinding::output("database", "security_group_id", "compute", "security_group_id"),
        ParameterBinding::output("database", "subnet2_id", "network", "subnet2_id"),
    ];
    (vec![network, compute, database], bindings)
}

/// Stack with no parameters and no outputs
pub fn leaf_stack(name: &str) -> StackDefinition {
    StackDefinition {
        name: name.to_string(),
        parameters: vec![],
        resources: vec![resource("bucket", "storage/bucket", json!({"name": name}))],
        outputs: vec![],
    }
}

/// Two stacks whose outputs feed each other
pub fn two_stack_cycle() -> (Vec<StackDefinition>, Vec<ParameterBinding>) {
    let make = |name: &str| StackDefinition {
        name: name.to_string(),
        parameters: vec![param("peer", ValueType::String)],
        resources: vec![resource("link", "network/link", json!({}))],
        outputs: vec![output("out", ValueType::String, "link", "id")],
    };
    let bindings = vec![
        ParameterBinding::output("a", "peer", "b", "out"),
        ParameterBinding::output("b", "peer", "a", "out"),
    ];
    (vec![make("a"), make("b")], bindings)
}

/// Applied state as if the pipeline had fully succeeded with the current
/// declarations: inputs mirror what the planner would resolve, resource
/// hashes match the declared configurations.
pub fn settled_pipeline_state(graph: &StackGraph) -> BTreeMap<String, AppliedState> {
    let outputs: BTreeMap<&str, BTreeMap<String, serde_json::Value>> = BTreeMap::from([
        (
            "network",
            BTreeMap::from([
                ("subnet_id".to_string(), json!("network-subnet-0")),
                ("subnet2_id".to_string(), json!("10.0.2.0/24")),
            ]),
        ),
        (
            "compute",
            BTreeMap::from([("security_group_id".to_string(), json!("compute-sg-1"))]),
        ),
        (
            "database",
            BTreeMap::from([("endpoint".to_string(), json!("database-instance-2"))]),
        ),
    ]);
    let inputs: BTreeMap<&str, BTreeMap<String, serde_json::Value>> = BTreeMap::from([
        (
            "network",
            BTreeMap::from([("cidr".to_string(), json!("10.0.0.0/16"))]),
        ),
        (
            "compute",
            BTreeMap::from([("subnet_id".to_string(), json!("network-subnet-0"))]),
        ),
        (
            "database",
            BTreeMap::from([
                ("security_group_id".to_string(), json!("compute-sg-1")),
                ("subnet2_id".to_string(), json!("10.0.2.0/24")),
            ]),
        ),
    ]);

    graph
        .definitions()
        .map(|def| {
            let resources = def
                .resources
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    (
                        r.name.clone(),
                        AppliedResource {
                            kind: r.kind.clone(),
                            config_hash: config_hash(&r.config),
                            fingerprint: format!("fp-{}-{i}", def.name),
                        },
                    )
                })
                .collect();
            let state = AppliedState {
                version: STATE_SCHEMA_VERSION,
                graph_id: graph.identity(),
                stack: def.name.clone(),
                run_id: "run-0".to_string(),
                status: StackStatus::Applied,
                inputs: inputs.get(def.name.as_str()).cloned().unwrap_or_default(),
                resources,
                outputs: outputs.get(def.name.as_str()).cloned().unwrap_or_default(),
                applied_at: Utc::now(),
            };
            (def.name.clone(), state)
        })
        .collect()
}
