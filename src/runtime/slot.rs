//! Single-publish result slot
//!
//! Holds the one result a runtime process may publish. A second publish is
//! a task-authoring bug: it is refused and the slot switches to a state the
//! inspection channel reports as a `DoublePublish` failure.
//!
//! Results are handed out only once the slot is sealed, i.e. after the
//! task body has finished, so a late second publish is never missed.

use std::sync::Arc;

use tokio::sync::watch;

use crate::common::{Error, Result};
use crate::ipc::protocol::RuntimePhase;
use crate::result::{FailureKind, TaskResult};

/// What the slot currently holds
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Empty,
    Published(TaskResult),
    /// Publish was attempted more than once; keeps the first result
    Violated(TaskResult),
}

impl SlotState {
    pub fn is_empty(&self) -> bool {
        matches!(self, SlotState::Empty)
    }

    pub fn phase(&self) -> RuntimePhase {
        match self {
            SlotState::Empty => RuntimePhase::Running,
            SlotState::Published(_) => RuntimePhase::Published,
            SlotState::Violated(_) => RuntimePhase::Violated,
        }
    }

    /// The result to hand out over the inspection channel
    pub fn reported(&self) -> Option<TaskResult> {
        match self {
            SlotState::Empty => None,
            SlotState::Published(result) => Some(result.clone()),
            SlotState::Violated(first) => Some(
                TaskResult::failure_of(FailureKind::DoublePublish, Error::DoublePublish.to_string())
                    .with_data("first_outcome", serde_json::to_value(first.outcome()).unwrap_or_default()),
            ),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SlotState,
    sealed: bool,
}

/// Shared handle to the slot; cloned into the task context and the server
#[derive(Debug, Clone)]
pub struct ResultSlot {
    inner: Arc<watch::Sender<Inner>>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Inner {
            state: SlotState::Empty,
            sealed: false,
        });
        Self { inner: Arc::new(tx) }
    }

    /// Publish the task's result; fails on every call after the first
    pub fn publish(&self, result: TaskResult) -> Result<()> {
        let mut outcome = Ok(());
        self.inner.send_modify(|inner| {
            let next = match &inner.state {
                SlotState::Empty => SlotState::Published(result),
                SlotState::Published(first) | SlotState::Violated(first) => {
                    outcome = Err(Error::DoublePublish);
                    SlotState::Violated(first.clone())
                }
            };
            inner.state = next;
        });
        outcome
    }

    /// Mark the body as finished; from now on the result can be handed out
    pub fn seal(&self) {
        self.inner.send_modify(|inner| inner.sealed = true);
    }

    pub fn snapshot(&self) -> SlotState {
        self.inner.borrow().state.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().state.is_empty()
    }

    /// Wait until the slot is sealed with something in it and return what
    /// to report. Never returns for a slot sealed empty.
    pub async fn wait_reported(&self) -> TaskResult {
        let mut rx = self.inner.subscribe();
        loop {
            {
                let inner = rx.borrow_and_update();
                if inner.sealed {
                    if let Some(result) = inner.state.reported() {
                        return result;
                    }
                }
            }
            if rx.changed().await.is_err() {
                // Sender dropped: the harness is shutting down
                std::future::pending::<()>().await;
            }
        }
    }
}
