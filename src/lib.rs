//! hwtask - process-isolated task runner for hardware test suites
//!
//! Every task runs in its own OS process built on the [`runtime`] harness.
//! The [`launcher`] spawns it, collects its single [`TaskResult`] over a
//! local inspection channel ([`ipc`]) and terminates it; the
//! [`coordinator`] walks the queue the [`manifest`] selector produced and
//! builds the run report.

pub mod cli;
pub mod commands;
pub mod common;
pub mod coordinator;
pub mod ipc;
pub mod launcher;
pub mod manifest;
pub mod result;
pub mod runtime;

// Re-export commonly used types
pub use common::{Error, Result};
pub use result::{FailureKind, Outcome, TaskResult};
