//! Testing utilities
//!
//! A scripted provider adapter and shared graph fixtures, used by the
//! unit tests and the integration tests alike.

pub mod fixtures;
mod mocks;

pub use mocks::{CallKind, MockProvider, RecordedCall};
