//! Inspection protocol message types
//!
//! Defines the request/response format between the launcher and a task
//! runtime process. Uses a simple length-prefixed JSON protocol.

use serde::{Deserialize, Serialize};

use crate::common::error::IpcError;

/// Request from the launcher to a runtime process
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// Response from a runtime process to the launcher
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self::success(id, serde_json::json!({}))
    }
}

/// Commands a launcher can send to a runtime process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Report what the runtime is doing right now
    Status,

    /// Answer with the published result, holding the response until the
    /// task body has published one
    AwaitResult,

    /// The result was collected; the runtime may exit
    Release,
}

/// Lifecycle of the task body as seen from inside the runtime process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    /// The body is still running and nothing was published
    Running,
    /// A result was published
    Published,
    /// The body published more than once
    Violated,
}

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub task: String,
    pub pid: u32,
    pub phase: RuntimePhase,
    pub uptime_ms: u64,
}
