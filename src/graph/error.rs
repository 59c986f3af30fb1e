//! Structural validation errors for the stack graph

use crate::stack::ValueType;
use thiserror::Error;

/// A single structural violation found while building the graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stack '{consumer}' parameter '{parameter}' references unknown {reference}")]
    UnresolvedReference {
        consumer: String,
        parameter: String,
        reference: String,
    },

    #[error(
        "stack '{consumer}' parameter '{parameter}' expects {expected}, got {found} from {source_ref}"
    )]
    TypeMismatch {
        consumer: String,
        parameter: String,
        expected: ValueType,
        found: String,
        source_ref: String,
    },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("stack '{stack}' required parameter '{parameter}' has no binding and no default")]
    UnboundParameter { stack: String, parameter: String },

    #[error("duplicate stack definition '{name}'")]
    DuplicateStack { name: String },
}

/// Exhaustive list of violations from one validation pass. The builder
/// never returns a partial graph; every violation found is reported here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct GraphErrors {
    pub violations: Vec<GraphError>,
}

impl GraphErrors {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }
}

impl std::fmt::Display for GraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} graph validation error(s):", self.violations.len())?;
        for violation in &self.violations {
            writeln!(f, "  - {violation}")?;
        }
        Ok(())
    }
}
