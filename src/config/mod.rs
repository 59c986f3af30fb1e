//! Declaration loading
//!
//! Parses YAML or JSON declaration files into stack definitions,
//! parameter bindings and a default active set, and applies literal
//! overrides from the command line.

mod loader;

pub use loader::{apply_overrides, load_declarations, DeclarationSet};
