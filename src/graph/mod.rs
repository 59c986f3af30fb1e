//! Dependency graph construction and validation
//!
//! Builds a directed acyclic graph from stack definitions and parameter
//! bindings. Validation is exhaustive: all violations are collected
//! before failing, so one run surfaces every problem.

mod builder;
mod error;

pub use builder::{identity_of, StackGraph};
pub use error::{GraphError, GraphErrors};
