//! Task launcher
//!
//! Runs one task definition to a terminal result inside its own runtime
//! process. The launcher is the containment boundary: whatever the task
//! does (hang, crash, never start), `launch` returns a [`TaskOutcome`] and
//! the process is gone afterwards.

pub mod process;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::ipc::InspectionClient;
use crate::manifest::{LaunchSpec, TaskDefinition};
use crate::result::TaskResult;

use process::{RuntimeEnv, TaskProcess};

/// Lifecycle state of a task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Collecting,
    Completed,
    TimedOut,
    Crashed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::TimedOut | RunState::Crashed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Collecting => "collecting",
            RunState::Completed => "completed",
            RunState::TimedOut => "timed_out",
            RunState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the launcher hands back for one task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub name: String,
    /// Runtime process id, if one was spawned
    pub pid: Option<u32>,
    pub state: RunState,
    pub result: TaskResult,
    pub elapsed: Duration,
}

impl TaskOutcome {
    /// Outcome for a task that never got a process
    pub fn not_started(name: &str, result: TaskResult) -> Self {
        Self {
            name: name.to_string(),
            pid: None,
            state: RunState::Pending,
            result,
            elapsed: Duration::ZERO,
        }
    }
}

/// Launcher timing settings
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Time for a process to announce and accept its inspection endpoint
    pub startup_grace: Duration,
    /// Time for a process to exit on its own after its result was collected
    pub release_grace: Duration,
    /// How long a process keeps an uncollected result
    pub linger: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self::from(&Timeouts::default())
    }
}

impl From<&Timeouts> for LaunchSettings {
    fn from(timeouts: &Timeouts) -> Self {
        Self {
            startup_grace: timeouts.startup_grace(),
            release_grace: timeouts.release_grace(),
            linger: timeouts.linger(),
        }
    }
}

/// One task's spawn-execute-collect-terminate lifecycle.
///
/// Exclusively owns the task's process; the process is terminated in
/// [`TaskRun::finish`], which consumes the run.
struct TaskRun<'a> {
    definition: &'a TaskDefinition,
    process: Option<TaskProcess>,
    state: RunState,
    result: Option<TaskResult>,
    started: Instant,
}

impl<'a> TaskRun<'a> {
    fn new(definition: &'a TaskDefinition) -> Self {
        Self {
            definition,
            process: None,
            state: RunState::Pending,
            result: None,
            started: Instant::now(),
        }
    }

    /// Drive the run up to a collected result or the error that ended it
    async fn execute(
        &mut self,
        settings: &LaunchSettings,
        spec: &LaunchSpec,
        budget: Duration,
        hard_stop: Option<Instant>,
    ) -> Result<TaskResult> {
        let name = self.definition.name.as_str();
        let env = RuntimeEnv {
            device: self.definition.device.clone(),
            linger: Some(settings.linger),
        };

        let process = self.process.insert(TaskProcess::spawn(name, spec, &env)?);
        transition(name, &mut self.state, RunState::Running);

        let connect_deadline = clip(Instant::now() + settings.startup_grace, hard_stop);
        let grace = connect_deadline.saturating_duration_since(Instant::now());
        let mut client = match InspectionClient::connect(process, grace).await {
            Ok(client) => client,
            Err(e) if hard_stop.is_some_and(|stop| Instant::now() >= stop) => {
                tracing::debug!(task = name, "Run deadline reached during startup: {}", e);
                return Err(Error::RunDeadline(rounded_secs(self.started.elapsed())));
            }
            Err(e) => return Err(e),
        };
        transition(name, &mut self.state, RunState::Collecting);

        let connected = Instant::now();
        let own_deadline = connected + budget;
        let deadline = clip(own_deadline, hard_stop);
        let result = match client
            .await_result(process, deadline, deadline.saturating_duration_since(connected))
            .await
        {
            Err(Error::Timeout(_)) if deadline < own_deadline => {
                return Err(Error::RunDeadline(rounded_secs(self.started.elapsed())));
            }
            other => other?,
        };

        if let Err(e) = client.release().await {
            tracing::debug!(task = name, "Release not acknowledged: {}", e);
        }
        if tokio::time::timeout(settings.release_grace, process.wait_exit())
            .await
            .is_err()
        {
            tracing::warn!(task = name, "Runtime process did not exit after release");
        }

        Ok(result)
    }

    /// Reach the terminal state, terminate the process, produce the outcome
    async fn finish(mut self, outcome: Result<TaskResult>) -> TaskOutcome {
        let name = self.definition.name.clone();

        let result = match outcome {
            Ok(result) => {
                transition(&name, &mut self.state, RunState::Completed);
                self.result = Some(result.clone());
                result
            }
            Err(e) => {
                let next = match e {
                    Error::Timeout(_) | Error::RunDeadline(_) => RunState::TimedOut,
                    _ => RunState::Crashed,
                };
                transition(&name, &mut self.state, next);
                TaskResult::failure_of(e.failure_kind(), e.to_string())
            }
        };
        debug_assert_eq!(self.result.is_some(), self.state == RunState::Completed);

        let mut pid = None;
        if let Some(mut process) = self.process.take() {
            pid = process.pid();
            process.terminate().await;
        }

        let elapsed = self.started.elapsed();
        tracing::info!(
            task = %name,
            state = %self.state,
            outcome = ?result.outcome(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Task finished"
        );

        TaskOutcome {
            name,
            pid,
            state: self.state,
            result,
            elapsed,
        }
    }
}

fn transition(task: &str, state: &mut RunState, next: RunState) {
    tracing::debug!(task, from = %state, to = %next, "Task state change");
    *state = next;
}

fn clip(deadline: Instant, hard_stop: Option<Instant>) -> Instant {
    match hard_stop {
        Some(stop) if stop < deadline => stop,
        _ => deadline,
    }
}

fn rounded_secs(duration: Duration) -> u64 {
    duration.as_secs_f64().round() as u64
}

/// Runs task definitions in isolated runtime processes
#[derive(Debug, Clone, Default)]
pub struct TaskLauncher {
    settings: LaunchSettings,
}

impl TaskLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Run one task to a terminal result.
    ///
    /// `budget` is the task's own execution deadline, counted from the
    /// moment its inspection channel is up; `hard_stop` is an absolute
    /// ceiling (e.g. the run-wide deadline). Never fails: every problem is
    /// reported as a failed [`TaskResult`], and the process is terminated
    /// exactly once before this returns.
    pub async fn launch(
        &self,
        definition: &TaskDefinition,
        spec: &LaunchSpec,
        budget: Duration,
        hard_stop: Option<Instant>,
    ) -> TaskOutcome {
        tracing::info!(task = %definition.name, budget_secs = budget.as_secs(), "Launching task");

        let mut run = TaskRun::new(definition);
        let outcome = run.execute(&self.settings, spec, budget, hard_stop).await;
        run.finish(outcome).await
    }
}
