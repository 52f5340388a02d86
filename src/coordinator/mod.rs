//! Run coordinator
//!
//! Walks the selected queue, launches each task through the
//! [`TaskLauncher`] and accumulates the results into a [`RunReport`]. A task
//! that crashes or times out never aborts the queue.
//!
//! Sequential by default. With `jobs > 1` up to that many task processes
//! run at once; tasks sharing a device still run one at a time, and the
//! report keeps queue order regardless of completion order.

mod report;
mod sink;

pub use report::{ReportEntry, RunReport};
pub use sink::{deliver, HttpSink, JsonFileSink, ResultSink};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::launcher::{LaunchSettings, TaskLauncher, TaskOutcome};
use crate::manifest::{Plan, TaskDefinition, TaskRegistry};
use crate::result::{FailureKind, TaskResult};

/// One lock per physical device named in the plan
type DeviceLocks = HashMap<String, Arc<Mutex<()>>>;

/// Runs a plan to a report
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    launcher: TaskLauncher,
    registry: Arc<TaskRegistry>,
    default_timeout: Duration,
    run_timeout: Option<Duration>,
    jobs: usize,
}

impl RunCoordinator {
    pub fn new(launcher: TaskLauncher, registry: TaskRegistry) -> Self {
        Self {
            launcher,
            registry: Arc::new(registry),
            default_timeout: crate::common::config::Timeouts::default().task(),
            run_timeout: None,
            jobs: 1,
        }
    }

    /// Coordinator with timeouts and parallelism taken from the config
    pub fn from_config(config: &Config, registry: TaskRegistry) -> Self {
        Self::new(TaskLauncher::new(LaunchSettings::from(&config.timeouts)), registry)
            .with_default_timeout(config.timeouts.task())
            .with_run_timeout(config.timeouts.run())
            .with_jobs(config.runner.jobs)
    }

    /// Deadline for tasks that do not set `timeout_secs`
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run every queued task and collect the report
    pub async fn run(&self, plan: &Plan) -> RunReport {
        let run_deadline = self.run_timeout.map(|timeout| Instant::now() + timeout);
        let locks = Arc::new(device_locks(plan));

        tracing::info!(
            tasks = plan.queue.len(),
            jobs = self.jobs,
            run_timeout_secs = self.run_timeout.map(|t| t.as_secs()),
            "Starting run"
        );

        let outcomes = if self.jobs <= 1 {
            let mut outcomes = Vec::with_capacity(plan.queue.len());
            for definition in &plan.queue {
                outcomes.push(self.run_one(definition, &locks, run_deadline).await);
            }
            outcomes
        } else {
            self.run_parallel(plan, locks, run_deadline).await
        };

        let mut report = RunReport::new();
        for outcome in &outcomes {
            report.record(outcome);
        }

        tracing::info!(
            passed = report.len() - report.failing().len(),
            failed = report.failing().len(),
            "Run finished"
        );
        report
    }

    async fn run_parallel(
        &self,
        plan: &Plan,
        locks: Arc<DeviceLocks>,
        run_deadline: Option<Instant>,
    ) -> Vec<TaskOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut join_set: JoinSet<(usize, TaskOutcome)> = JoinSet::new();
        let mut slots: Vec<Option<TaskOutcome>> = vec![None; plan.queue.len()];

        for (index, definition) in plan.queue.iter().enumerate() {
            // Permits are taken in queue order, so tasks start in queue order
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let coordinator = self.clone();
            let definition = definition.clone();
            let locks = Arc::clone(&locks);
            join_set.spawn(async move {
                let _permit = permit;
                let outcome = coordinator.run_one(&definition, &locks, run_deadline).await;
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!("Task run aborted: {}", e),
            }
        }

        plan.queue
            .iter()
            .zip(slots)
            .map(|(definition, slot)| {
                slot.unwrap_or_else(|| {
                    TaskOutcome::not_started(
                        &definition.name,
                        TaskResult::failure_of(FailureKind::Crashed, "task run was aborted"),
                    )
                })
            })
            .collect()
    }

    /// Run one task, honoring its device lock and the run deadline
    async fn run_one(
        &self,
        definition: &TaskDefinition,
        locks: &DeviceLocks,
        run_deadline: Option<Instant>,
    ) -> TaskOutcome {
        if deadline_passed(run_deadline) {
            return run_deadline_outcome(definition);
        }

        let Some(spec) = self.registry.get(&definition.name) else {
            return TaskOutcome::not_started(
                &definition.name,
                TaskResult::failure_of(FailureKind::Launch, "no executable registered for task"),
            );
        };

        // Held until the launcher returned, i.e. after the process is gone
        let _device_guard = match definition.device.as_deref() {
            Some(device) => match acquire_device(locks, device, run_deadline).await {
                Some(guard) => Some(guard),
                None => return run_deadline_outcome(definition),
            },
            None => None,
        };

        if deadline_passed(run_deadline) {
            return run_deadline_outcome(definition);
        }

        let budget = definition.timeout.unwrap_or(self.default_timeout);
        self.launcher.launch(definition, spec, budget, run_deadline).await
    }
}

fn device_locks(plan: &Plan) -> DeviceLocks {
    plan.queue
        .iter()
        .filter_map(|task| task.device.clone())
        .map(|device| (device, Arc::new(Mutex::new(()))))
        .collect()
}

/// Wait for exclusive use of `device`; `None` when the run deadline passes
/// first
async fn acquire_device(
    locks: &DeviceLocks,
    device: &str,
    run_deadline: Option<Instant>,
) -> Option<OwnedMutexGuard<()>> {
    let lock = match locks.get(device) {
        Some(lock) => Arc::clone(lock),
        None => Arc::new(Mutex::new(())),
    };

    tracing::debug!(device, "Waiting for device");
    match run_deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, lock.lock_owned()).await.ok(),
        None => Some(lock.lock_owned().await),
    }
}

fn deadline_passed(run_deadline: Option<Instant>) -> bool {
    run_deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn run_deadline_outcome(definition: &TaskDefinition) -> TaskOutcome {
    tracing::warn!(task = %definition.name, "Run deadline passed before the task started");
    TaskOutcome::not_started(
        &definition.name,
        TaskResult::failure_of(
            FailureKind::RunDeadline,
            "run deadline passed before the task started",
        ),
    )
}
