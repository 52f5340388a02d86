//! Common utilities shared between the runner and task runtime processes

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Prefix of the startup signal a runtime process writes to stdout
pub const STARTUP_SIGNAL: &str = "hwtask inspect listening at:";

/// Format the startup signal line for an endpoint
pub fn startup_signal(endpoint: &str) -> String {
    format!("{} {}", STARTUP_SIGNAL, endpoint)
}

/// Parse the inspection endpoint out of a startup signal line.
///
/// Only a line that starts with the signal prefix counts; anything else a
/// task writes to stdout is ignored.
pub fn parse_startup_signal(line: &str) -> Option<String> {
    let endpoint = line.trim_end().strip_prefix(STARTUP_SIGNAL)?.trim();
    if endpoint.is_empty() {
        None
    } else {
        Some(endpoint.to_string())
    }
}
