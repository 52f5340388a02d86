//! Error types for hwtask
//!
//! Per-task infrastructure errors (connection, timeout, process exit) never
//! leave the launcher; they are turned into failed task results there. The
//! remaining variants are pre-flight errors that abort a run before any
//! task process is spawned.

use std::io;
use thiserror::Error;

use crate::result::FailureKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hwtask
#[derive(Error, Debug)]
pub enum Error {
    // === Inspection Channel Errors ===
    #[error("Task '{task}' did not expose its inspection endpoint: {reason}")]
    Connection { task: String, reason: String },

    #[error("exceeded {0}s timeout")]
    Timeout(u64),

    #[error("run deadline reached after {0}s")]
    RunDeadline(u64),

    #[error("process {0} before reporting")]
    ProcessExited(String),

    #[error("Inspection channel error: {0}")]
    Channel(String),

    // === Runtime Errors ===
    #[error("task attempted to publish more than one result")]
    DoublePublish,

    #[error("Failed to spawn task '{task}': {reason}")]
    Spawn { task: String, reason: String },

    // === Selection Errors ===
    #[error("Unknown task '{0}'. Use 'hwtask list --all' to see the manifest")]
    UnknownTask(String),

    #[error("Task '{0}' is declared more than once in the manifest")]
    DuplicateTask(String),

    #[error("Invalid manifest '{path}': {reason}")]
    ManifestParse { path: String, reason: String },

    #[error("Executable for task '{task}' not found: {program}")]
    MissingExecutable { task: String, program: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Report Errors ===
    #[error("Result sink '{sink}' failed: {reason}")]
    Sink { sink: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a connection error for a task
    pub fn connection(task: &str, reason: impl Into<String>) -> Self {
        Self::Connection {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a spawn error for a task
    pub fn spawn(task: &str, reason: impl Into<String>) -> Self {
        Self::Spawn {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    /// Failure category a task gets when this error ends its run
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Connection { .. } => FailureKind::ConnectionFailed,
            Error::Timeout(_) | Error::RunDeadline(_) => FailureKind::Timeout,
            Error::DoublePublish => FailureKind::DoublePublish,
            Error::Spawn { .. } | Error::MissingExecutable { .. } => FailureKind::Launch,
            _ => FailureKind::Crashed,
        }
    }
}

/// IPC-serializable error for inspection responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::Timeout(_) | Error::RunDeadline(_) => "TIMEOUT",
            Error::Channel(_) => "CHANNEL",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        Error::Channel(format!("{}: {}", e.code, e.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timeout() {
        assert_eq!(Error::Timeout(600).to_string(), "exceeded 600s timeout");
    }

    #[test]
    fn test_run_deadline_is_a_timeout_with_its_own_message() {
        let e = Error::RunDeadline(2);
        assert_eq!(e.to_string(), "run deadline reached after 2s");
        assert_eq!(e.failure_kind(), FailureKind::Timeout);
        assert_eq!(IpcError::from(&e).code, "TIMEOUT");
    }

    #[test]
    fn test_process_exit_message() {
        let e = Error::ProcessExited("exited with code 1".to_string());
        assert_eq!(e.to_string(), "process exited with code 1 before reporting");
    }

    #[test]
    fn test_ipc_error_becomes_channel_error() {
        let wire = IpcError::from(&Error::Internal("listener gone".to_string()));
        assert_eq!(wire.code, "INTERNAL_ERROR");
        match Error::from(wire) {
            Error::Channel(msg) => assert!(msg.contains("listener gone")),
            other => panic!("Expected Channel, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(Error::Timeout(2).failure_kind(), FailureKind::Timeout);
        assert_eq!(
            Error::connection("boot", "no signal").failure_kind(),
            FailureKind::ConnectionFailed
        );
        assert_eq!(
            Error::ProcessExited("exited with code 1".into()).failure_kind(),
            FailureKind::Crashed
        );
    }
}
