//! CLI argument structures
//!
//! The main parser plus all subcommand definitions. Routing lives in
//! [`super::router`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Plan, apply and tear down dependent infrastructure stacks
#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "stratus - Orchestrate dependent infrastructure stacks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate declarations and show what a run would change
    #[command(name = "plan")]
    Plan {
        /// Declaration file (YAML or JSON)
        declarations: PathBuf,

        /// Directory holding persisted stack state
        #[arg(long, default_value = ".stratus/state")]
        state_dir: PathBuf,

        /// Restrict the run to these stacks (repeatable)
        #[arg(long, value_name = "STACK")]
        active: Vec<String>,

        /// Override a parameter with a literal value (repeatable)
        #[arg(long, value_name = "STACK.PARAM=VALUE")]
        param: Vec<String>,

        /// Emit the plan as JSON for CI consumption
        #[arg(long)]
        json: bool,
    },

    /// Plan and execute against the providers
    #[command(name = "apply")]
    Apply {
        /// Declaration file (YAML or JSON)
        declarations: PathBuf,

        /// Directory holding persisted stack state
        #[arg(long, default_value = ".stratus/state")]
        state_dir: PathBuf,

        /// Restrict the run to these stacks (repeatable)
        #[arg(long, value_name = "STACK")]
        active: Vec<String>,

        /// Override a parameter with a literal value (repeatable)
        #[arg(long, value_name = "STACK.PARAM=VALUE")]
        param: Vec<String>,

        /// Upper bound on concurrently executing independent stacks
        #[arg(long, default_value = "4")]
        max_parallel: usize,

        /// Emit the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tear down every stack with persisted state
    #[command(name = "destroy")]
    Destroy {
        /// Declaration file (YAML or JSON)
        declarations: PathBuf,

        /// Directory holding persisted stack state
        #[arg(long, default_value = ".stratus/state")]
        state_dir: PathBuf,

        /// Upper bound on concurrently executing independent stacks
        #[arg(long, default_value = "4")]
        max_parallel: usize,

        /// Emit the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect persisted stack state
    #[command(name = "state")]
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// List every stack record for a declaration set
    List {
        /// Declaration file (YAML or JSON)
        declarations: PathBuf,

        /// Directory holding persisted stack state
        #[arg(long, default_value = ".stratus/state")]
        state_dir: PathBuf,

        /// Emit records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one stack's full record
    Show {
        /// Declaration file (YAML or JSON)
        declarations: PathBuf,

        /// Stack to show
        stack: String,

        /// Directory holding persisted stack state
        #[arg(long, default_value = ".stratus/state")]
        state_dir: PathBuf,
    },
}
