//! Stack definition model
//!
//! Immutable descriptions of orchestration units: declared parameters,
//! opaque resource declarations and exposed outputs, plus the parameter
//! bindings that wire stacks together. Loaded once per run and read-only
//! thereafter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag for parameter and output values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Bool,
    List,
    Map,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::List => "list",
            ValueType::Map => "map",
        }
    }

    /// Classify a JSON value into its type tag, if it has one
    pub fn of_value(value: &Value) -> Option<ValueType> {
        match value {
            Value::String(_) => Some(ValueType::String),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Int),
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Array(_) => Some(ValueType::List),
            Value::Object(_) => Some(ValueType::Map),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declared input parameter of a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

/// A resource owned by a stack; the kind tag and configuration are opaque
/// to the engine and interpreted only by the provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

/// Source expression of an output: an attribute of one of the stack's
/// resources, written `resource.attribute` in declaration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputExpr {
    pub resource: String,
    pub attribute: String,
}

impl std::fmt::Display for OutputExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// An output attribute a stack exposes to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: OutputExpr,
}

/// Immutable description of one orchestration unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

impl StackDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputDecl> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Where a bound parameter gets its value from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// A literal value supplied in the declaration or as an override
    Literal(Value),
    /// Another stack's output; the sole mechanism for inter-stack
    /// dependency
    Output { producer: String, output: String },
}

/// Edge routing a value into one stack parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub consumer: String,
    pub parameter: String,
    pub source: BindingSource,
}

impl ParameterBinding {
    pub fn literal(consumer: &str, parameter: &str, value: Value) -> Self {
        Self {
            consumer: consumer.to_string(),
            parameter: parameter.to_string(),
            source: BindingSource::Literal(value),
        }
    }

    pub fn output(consumer: &str, parameter: &str, producer: &str, output: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            parameter: parameter.to_string(),
            source: BindingSource::Output {
                producer: producer.to_string(),
                output: output.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_classification() {
        assert_eq!(ValueType::of_value(&json!("a")), Some(ValueType::String));
        assert_eq!(ValueType::of_value(&json!(42)), Some(ValueType::Int));
        assert_eq!(ValueType::of_value(&json!(true)), Some(ValueType::Bool));
        assert_eq!(ValueType::of_value(&json!([1, 2])), Some(ValueType::List));
        assert_eq!(ValueType::of_value(&json!({"k": 1})), Some(ValueType::Map));
        assert_eq!(ValueType::of_value(&json!(null)), None);
        assert_eq!(ValueType::of_value(&json!(1.5)), None);
    }

    #[test]
    fn test_definition_lookups() {
        let def = StackDefinition {
            name: "network".to_string(),
            parameters: vec![ParameterSpec {
                name: "cidr".to_string(),
                value_type: ValueType::String,
                required: true,
                default: None,
            }],
            resources: vec![ResourceDecl {
                name: "vpc".to_string(),
                kind: "network/vpc".to_string(),
                config: json!({"cidr": "10.0.0.0/16"}),
            }],
            outputs: vec![OutputDecl {
                name: "vpc_id".to_string(),
                value_type: ValueType::String,
                value: OutputExpr {
                    resource: "vpc".to_string(),
                    attribute: "id".to_string(),
                },
            }],
        };

        assert!(def.parameter("cidr").is_some());
        assert!(def.parameter("missing").is_none());
        assert_eq!(def.output("vpc_id").unwrap().value.to_string(), "vpc.id");
        assert_eq!(def.resource("vpc").unwrap().kind, "network/vpc");
    }
}
