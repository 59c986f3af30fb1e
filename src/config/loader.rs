//! Declaration file parsing
//!
//! A declaration file carries the raw form of the stack model: output
//! expressions are written `resource.attribute` and bindings carry
//! either a `value` literal or a `from: producer.output` reference.
//! Everything is converted into the typed stack model here, before
//! graph validation sees it.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::stack::{
    BindingSource, OutputDecl, OutputExpr, ParameterBinding, ParameterSpec, ResourceDecl,
    StackDefinition, ValueType,
};

/// Everything one declaration file contributes to a run
#[derive(Debug)]
pub struct DeclarationSet {
    pub definitions: Vec<StackDefinition>,
    pub bindings: Vec<ParameterBinding>,
    /// Stacks the run should converge on; defaults to every declared
    /// stack when the file does not narrow it
    pub active: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarationFile {
    #[serde(default)]
    stacks: Vec<RawStack>,
    #[serde(default)]
    bindings: Vec<RawBinding>,
    #[serde(default)]
    active: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStack {
    name: String,
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    #[serde(default)]
    resources: Vec<ResourceDecl>,
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    name: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    /// `resource.attribute`
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBinding {
    stack: String,
    parameter: String,
    /// `producer.output`; mutually exclusive with `value`
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

/// Load a declaration file, YAML or JSON by extension
pub async fn load_declarations(path: &Path) -> Result<DeclarationSet> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read declaration file: {}", path.display()))?;

    let extension = path.extension().and_then(|s| s.to_str());
    let file: DeclarationFile = if matches!(extension, Some("yml") | Some("yaml")) {
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML declarations: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON declarations: {}", path.display()))?
    };

    convert(file)
}

fn convert(file: DeclarationFile) -> Result<DeclarationSet> {
    let mut definitions = Vec::with_capacity(file.stacks.len());
    for stack in file.stacks {
        let mut outputs = Vec::with_capacity(stack.outputs.len());
        for output in stack.outputs {
            let expr = parse_expr(&output.value).with_context(|| {
                format!("stack '{}' output '{}'", stack.name, output.name)
            })?;
            outputs.push(OutputDecl {
                name: output.name,
                value_type: output.value_type,
                value: expr,
            });
        }
        definitions.push(StackDefinition {
            name: stack.name,
            parameters: stack.parameters,
            resources: stack.resources,
            outputs,
        });
    }

    let mut bindings = Vec::with_capacity(file.bindings.len());
    for binding in file.bindings {
        let source = match (binding.from, binding.value) {
            (Some(reference), None) => {
                let expr = parse_expr(&reference).with_context(|| {
                    format!(
                        "binding for '{}.{}'",
                        binding.stack, binding.parameter
                    )
                })?;
                BindingSource::Output {
                    producer: expr.resource,
                    output: expr.attribute,
                }
            }
            (None, Some(value)) => BindingSource::Literal(value),
            (Some(_), Some(_)) => bail!(
                "binding for '{}.{}' has both 'from' and 'value'",
                binding.stack,
                binding.parameter
            ),
            (None, None) => bail!(
                "binding for '{}.{}' needs either 'from' or 'value'",
                binding.stack,
                binding.parameter
            ),
        };
        bindings.push(ParameterBinding {
            consumer: binding.stack,
            parameter: binding.parameter,
            source,
        });
    }

    let active: BTreeSet<String> = match file.active {
        Some(names) => names.into_iter().collect(),
        None => definitions.iter().map(|d| d.name.clone()).collect(),
    };

    Ok(DeclarationSet {
        definitions,
        bindings,
        active,
    })
}

/// Parse a `left.right` expression; the right side may itself contain
/// dots (attribute paths are opaque to the engine)
fn parse_expr(raw: &str) -> Result<OutputExpr> {
    match raw.split_once('.') {
        Some((resource, attribute)) if !resource.is_empty() && !attribute.is_empty() => {
            Ok(OutputExpr {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
            })
        }
        _ => bail!("malformed expression '{raw}', expected 'name.attribute'"),
    }
}

/// Apply `stack.param=value` literal overrides on top of the declared
/// bindings. Values parse as JSON when they can, otherwise as strings,
/// and replace any binding already present for the same parameter.
pub fn apply_overrides(declarations: &mut DeclarationSet, overrides: &[String]) -> Result<()> {
    for raw in overrides {
        let (target, value) = raw
            .split_once('=')
            .with_context(|| format!("malformed override '{raw}', expected STACK.PARAM=VALUE"))?;
        let (stack, parameter) = target
            .split_once('.')
            .with_context(|| format!("malformed override target '{target}', expected STACK.PARAM"))?;
        let value: Value = serde_json::from_str(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));

        let existing = declarations
            .bindings
            .iter_mut()
            .find(|b| b.consumer == stack && b.parameter == parameter);
        match existing {
            Some(binding) => binding.source = BindingSource::Literal(value),
            None => declarations
                .bindings
                .push(ParameterBinding::literal(stack, parameter, value)),
        }
    }
    Ok(())
}
