//! Task result model
//!
//! A [`TaskResult`] is the only value that crosses the process boundary
//! between a task runtime process and the launcher. It is produced exactly
//! once per task execution, either by the task body or by the launcher when
//! the task never got to report.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Final verdict of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Why a task failed
///
/// `Task` is the only category the task body produces itself; every other
/// kind is assigned by the framework when containment kicked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task body ran and reported a failure
    Task,
    /// The task did not report before its deadline
    Timeout,
    /// The process exited without reporting
    Crashed,
    /// The process never exposed its inspection endpoint
    ConnectionFailed,
    /// The task body tried to publish more than one result
    DoublePublish,
    /// The run-wide deadline passed before the task could start
    RunDeadline,
    /// The task executable could not be started
    Launch,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Timeout => "timeout",
            Self::Crashed => "crashed",
            Self::ConnectionFailed => "connection_failed",
            Self::DoublePublish => "double_publish",
            Self::RunDeadline => "run_deadline",
            Self::Launch => "launch",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task execution plus its measurement data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    outcome: Outcome,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_kind: Option<FailureKind>,
}

impl TaskResult {
    /// A plain pass with no data
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            data: Map::new(),
            failure_detail: None,
            failure_kind: None,
        }
    }

    /// A pass carrying measurement data
    pub fn success_with(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::success()
        }
    }

    /// A failure reported by the task body
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::failure_of(FailureKind::Task, detail)
    }

    /// A failure of a specific category
    pub fn failure_of(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure,
            data: Map::new(),
            failure_detail: Some(detail.into()),
            failure_kind: Some(kind),
        }
    }

    /// Attach one data entry
    ///
    /// Works for both outcomes; for failures this is the explicit opt-in to
    /// carrying data.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_detail.as_deref()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    /// Restore the outcome invariants on a value received from another
    /// process: a success never carries failure fields and a failure always
    /// has a detail and a kind.
    pub fn normalized(mut self) -> Self {
        match self.outcome {
            Outcome::Success => {
                self.failure_detail = None;
                self.failure_kind = None;
            }
            Outcome::Failure => {
                if self.failure_detail.is_none() {
                    self.failure_detail = Some("task reported failure".to_string());
                }
                if self.failure_kind.is_none() {
                    self.failure_kind = Some(FailureKind::Task);
                }
            }
        }
        self
    }
}
