//! Command routing
//!
//! Maps parsed subcommands onto the engine: load declarations, validate
//! the graph, plan, and (for apply/destroy) execute. Exit codes: 0 on
//! success, 1 when any planned entry failed, 2 on validation errors.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;

use crate::cli::args::{Commands, StateCommands};
use crate::config;
use crate::error::{Result, EXIT_EXECUTION_FAILED, EXIT_SUCCESS};
use crate::exec::{CancelFlag, Executor, ExecutorConfig, RunReport};
use crate::graph::{identity_of, StackGraph};
use crate::plan::{Plan, Planner};
use crate::provider::{ProviderRegistry, SimulatedProvider};
use crate::state::{AppliedState, JsonStateStore, StateStore};

/// Execute a parsed subcommand and return the process exit code
pub async fn execute_command(command: Commands, cancel: CancelFlag) -> Result<i32> {
    match command {
        Commands::Plan {
            declarations,
            state_dir,
            active,
            param,
            json,
        } => {
            let run = prepare(&declarations, &state_dir, &active, &param, false).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run.plan)?);
            } else {
                print_plan(&run.plan);
            }
            Ok(EXIT_SUCCESS)
        }
        Commands::Apply {
            declarations,
            state_dir,
            active,
            param,
            max_parallel,
            json,
        } => {
            let run = prepare(&declarations, &state_dir, &active, &param, false).await?;
            execute_plan(run, max_parallel, json, cancel).await
        }
        Commands::Destroy {
            declarations,
            state_dir,
            max_parallel,
            json,
        } => {
            let run = prepare(&declarations, &state_dir, &[], &[], true).await?;
            execute_plan(run, max_parallel, json, cancel).await
        }
        Commands::State { command } => run_state(command).await,
    }
}

struct PreparedRun {
    graph: StackGraph,
    store: Arc<JsonStateStore>,
    prior: BTreeMap<String, AppliedState>,
    plan: Plan,
}

/// Load, validate and plan. Every structural problem surfaces here,
/// before any provider is touched.
async fn prepare(
    declarations: &Path,
    state_dir: &Path,
    active_flags: &[String],
    overrides: &[String],
    teardown: bool,
) -> Result<PreparedRun> {
    let mut decls = config::load_declarations(declarations).await?;
    config::apply_overrides(&mut decls, overrides)?;

    let active = if teardown {
        BTreeSet::new()
    } else if active_flags.is_empty() {
        decls.active.clone()
    } else {
        let set: BTreeSet<String> = active_flags.iter().cloned().collect();
        for name in &set {
            if !decls.definitions.iter().any(|d| &d.name == name) {
                return Err(anyhow!("--active stack '{name}' is not declared").into());
            }
        }
        set
    };

    let graph = StackGraph::build(decls.definitions, decls.bindings, &active)?;
    let store = JsonStateStore::open(state_dir, &graph.identity())?;
    let prior: BTreeMap<String, AppliedState> = store
        .list()
        .await?
        .into_iter()
        .map(|s| (s.stack.clone(), s))
        .collect();
    let plan = Planner::new(&graph).plan(&prior, &active);

    Ok(PreparedRun {
        graph,
        store: Arc::new(store),
        prior,
        plan,
    })
}

async fn execute_plan(
    run: PreparedRun,
    max_parallel: usize,
    json: bool,
    cancel: CancelFlag,
) -> Result<i32> {
    let mut providers = ProviderRegistry::new();
    providers.register_fallback(Arc::new(SimulatedProvider::new()));

    let store: Arc<dyn StateStore> = run.store;
    let executor = Executor::new(providers, store)
        .with_config(ExecutorConfig { max_parallel })
        .with_cancel(cancel);
    let report = executor.execute(&run.graph, &run.plan, &run.prior).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_EXECUTION_FAILED
    })
}

async fn run_state(command: StateCommands) -> Result<i32> {
    match command {
        StateCommands::List {
            declarations,
            state_dir,
            json,
        } => {
            let store = open_store(&declarations, &state_dir).await?;
            let records = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No state recorded.");
            } else {
                for record in &records {
                    println!(
                        "{:<24} {:<16} run {}  {}",
                        record.stack,
                        record.status.as_str(),
                        record.run_id,
                        record.applied_at.to_rfc3339()
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }
        StateCommands::Show {
            declarations,
            stack,
            state_dir,
        } => {
            let store = open_store(&declarations, &state_dir).await?;
            match store.load(&stack).await? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(EXIT_SUCCESS)
                }
                None => {
                    eprintln!("No state recorded for stack '{stack}'.");
                    Ok(EXIT_EXECUTION_FAILED)
                }
            }
        }
    }
}

/// State commands locate the store from the declared stack names alone,
/// so inspection works even when the graph no longer validates
async fn open_store(declarations: &Path, state_dir: &Path) -> Result<JsonStateStore> {
    let decls = config::load_declarations(declarations).await?;
    let identity = identity_of(decls.definitions.iter().map(|d| d.name.as_str()));
    Ok(JsonStateStore::open(state_dir, &identity)?)
}

fn print_plan(plan: &Plan) {
    if plan.entries.is_empty() {
        println!("Nothing to do: no stacks declared or recorded.");
        return;
    }
    for entry in &plan.entries {
        println!(
            "{:<8} {:<24} {}",
            entry.action.as_str(),
            entry.stack,
            entry.reason
        );
    }
    println!();
    if plan.is_noop() {
        println!("No changes. {} stack(s) up to date.", plan.entries.len());
    } else {
        println!(
            "{} change(s) pending across {} stack(s).",
            plan.changes(),
            plan.entries.len()
        );
    }
}

fn print_report(report: &RunReport) {
    for result in &report.results {
        match &result.message {
            Some(message) => println!(
                "{:<16} {:<24} {}",
                result.outcome.as_str(),
                result.stack,
                message
            ),
            None => println!("{:<16} {}", result.outcome.as_str(), result.stack),
        }
    }
    println!();
    if report.cancelled {
        println!("Run {} cancelled.", report.run_id);
    } else if report.success() {
        println!("Run {} succeeded.", report.run_id);
    } else {
        println!("Run {} failed.", report.run_id);
    }
}
