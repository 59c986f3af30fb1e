//! Top-level error type and exit-code mapping for the run surface
//!
//! Structural validation problems fail a run before any provider call
//! and map to exit code 2; everything that happens after planning maps
//! to exit code 1. Cancellation exit codes mirror the signal that
//! caused them.

use thiserror::Error;

use crate::graph::GraphErrors;
use crate::state::StateError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_EXECUTION_FAILED: i32 = 1;
pub const EXIT_VALIDATION: i32 = 2;
pub const EXIT_SIGINT: i32 = 130;
pub const EXIT_SIGTERM: i32 = 143;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Declaration file could not be read or parsed into a stack set
    #[error("{0:#}")]
    Declaration(#[from] anyhow::Error),

    /// Structural validation of the stack graph failed
    #[error("{0}")]
    Graph(#[from] GraphErrors),

    /// Persisted state could not be read or written
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// Plan or report output could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Exit code the binary reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Declaration(_) | Error::Graph(_) => EXIT_VALIDATION,
            Error::State(_) | Error::Serialization(_) => EXIT_EXECUTION_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphError;

    #[test]
    fn test_validation_errors_map_to_exit_2() {
        let graph_errors = GraphErrors {
            violations: vec![GraphError::DuplicateStack {
                name: "network".to_string(),
            }],
        };
        assert_eq!(Error::Graph(graph_errors).exit_code(), EXIT_VALIDATION);
        assert_eq!(
            Error::Declaration(anyhow::anyhow!("bad file")).exit_code(),
            EXIT_VALIDATION
        );
    }

    #[test]
    fn test_state_errors_map_to_exit_1() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            Error::State(StateError::Io(io)).exit_code(),
            EXIT_EXECUTION_FAILED
        );
    }
}
