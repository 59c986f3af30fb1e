//! Execution error types

use crate::state::StateError;
use thiserror::Error;

/// Failures raised while executing a plan. Provider and rollback
/// failures are distinct: a rollback failure implies undefined resource
/// state and is surfaced as such.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("provider failed for stack '{stack}' resource '{resource}': {source}")]
    Provider {
        stack: String,
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rollback failed for stack '{stack}' resource '{resource}': {source}")]
    Rollback {
        stack: String,
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no provider adapter registered for kind '{kind}' (stack '{stack}')")]
    UnknownKind { stack: String, kind: String },

    #[error(
        "stack '{stack}' parameter '{parameter}' needs output '{producer}.{output}', \
         which this run did not produce"
    )]
    MissingOutput {
        stack: String,
        parameter: String,
        producer: String,
        output: String,
    },

    #[error("stack '{stack}' output '{output}' reads '{expr}', but the provider returned no such attribute")]
    MissingAttribute {
        stack: String,
        output: String,
        expr: String,
    },

    #[error(transparent)]
    State(#[from] StateError),
}
