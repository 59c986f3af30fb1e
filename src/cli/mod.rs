//! Run surface
//!
//! Argument structures and the router that maps subcommands onto the
//! engine.

pub mod args;
pub mod router;

pub use args::{Cli, Commands, StateCommands};
pub use router::execute_command;
