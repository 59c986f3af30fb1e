//! Plan execution
//!
//! Runs a plan against the provider adapters: dependency-wave dispatch
//! with bounded sibling parallelism, in-run output propagation into
//! dependents, halt-and-skip on upstream failure, and compensating
//! rollback of resources this run itself created.

mod error;
mod executor;
mod interpolate;
mod report;

pub use error::ExecError;
pub use executor::{Executor, ExecutorConfig};
pub use interpolate::interpolate;
pub use report::{RunReport, StackOutcome, StackResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between the signal handler and the
/// executor. Once set, no new plan entries are dispatched; in-flight
/// provider calls run to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
