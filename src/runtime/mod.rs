//! Task runtime - the harness a task executable runs inside
//!
//! A task executable hands exactly one body to the harness:
//!
//! ```no_run
//! use hwtask::TaskResult;
//!
//! fn main() {
//!     hwtask::runtime::main(|ctx| async move {
//!         let latency_ms = 42;
//!         eprintln!("{} measured {}ms", ctx.task(), latency_ms);
//!         Ok::<_, std::io::Error>(TaskResult::success().with_data("latency_ms", latency_ms))
//!     })
//! }
//! ```
//!
//! The harness:
//! 1. Binds a per-process inspection endpoint
//! 2. Announces it with the startup signal on stdout
//! 3. Runs the body and publishes its result
//! 4. Stays alive until the launcher releases it (or the linger elapses)
//!
//! A body that fails or panics without having published makes the process
//! exit non-zero with nothing published.

mod server;
mod slot;

pub use slot::{ResultSlot, SlotState};

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::common::{self, logging, paths, Error, Result};
use crate::ipc::transport;
use crate::launcher::process::{ENV_DEVICE, ENV_LINGER_SECS, ENV_TASK};
use crate::result::TaskResult;

use server::InspectionServer;

/// Exit code when the body returned an error without publishing
pub const EXIT_TASK_ERROR: i32 = 1;
/// Exit code when the harness itself could not start
pub const EXIT_SETUP_FAILED: i32 = 2;
/// Exit code when the body panicked without publishing
pub const EXIT_PANIC: i32 = 101;

/// Default time to keep a published result available without a release
const DEFAULT_LINGER: Duration = Duration::from_secs(30);

/// Handle given to the task body
#[derive(Debug, Clone)]
pub struct TaskContext {
    task: String,
    device: Option<String>,
    slot: ResultSlot,
}

impl TaskContext {
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Device this task holds the lock for, if any
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Publish the result before the body returns.
    ///
    /// The result stands even if the body then ends with an error (e.g. a
    /// failing teardown). It is handed to the launcher once the body has
    /// finished. Publishing here and also returning a result is a double
    /// publish.
    pub fn publish(&self, result: TaskResult) -> Result<()> {
        self.slot.publish(result)
    }
}

/// Hosts one task body
#[derive(Debug, Clone)]
pub struct Harness {
    task: String,
    device: Option<String>,
    linger: Duration,
}

impl Harness {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            device: None,
            linger: DEFAULT_LINGER,
        }
    }

    /// Build the harness from the environment the launcher provides
    pub fn from_env() -> Result<Self> {
        let task = std::env::var(ENV_TASK).map_err(|_| {
            Error::Config(format!("{} is not set; task executables are started by 'hwtask run'", ENV_TASK))
        })?;

        let mut harness = Self::new(task);
        harness.device = std::env::var(ENV_DEVICE).ok().filter(|d| !d.is_empty());
        if let Ok(secs) = std::env::var(ENV_LINGER_SECS) {
            let secs: u64 = secs
                .parse()
                .map_err(|_| Error::Config(format!("invalid {}: {}", ENV_LINGER_SECS, secs)))?;
            harness.linger = Duration::from_secs(secs);
        }
        Ok(harness)
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Run the body to completion and return the process exit code
    pub async fn run<F, Fut, E>(self, body: F) -> i32
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = std::result::Result<TaskResult, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let pid = std::process::id();
        let endpoint = paths::endpoint_name(&self.task, pid);

        let listener = match transport::create_listener(&endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(task = %self.task, %endpoint, "Failed to bind inspection endpoint: {}", e);
                return EXIT_SETUP_FAILED;
            }
        };

        let slot = ResultSlot::new();
        let release = Arc::new(Notify::new());
        let server = Arc::new(InspectionServer::new(&self.task, slot.clone(), Arc::clone(&release)));
        let server_handle = tokio::spawn(server.serve(listener));

        if let Err(e) = announce(&endpoint) {
            tracing::error!(task = %self.task, "Failed to write startup signal: {}", e);
            server_handle.abort();
            let _ = paths::remove_endpoint(&endpoint);
            return EXIT_SETUP_FAILED;
        }
        tracing::info!(task = %self.task, pid, %endpoint, "Task runtime started");

        let ctx = TaskContext {
            task: self.task.clone(),
            device: self.device.clone(),
            slot: slot.clone(),
        };

        let mut failure_code = EXIT_TASK_ERROR;
        match tokio::spawn(body(ctx)).await {
            Ok(Ok(result)) => match slot.publish(result) {
                Ok(()) => tracing::info!(task = %self.task, "Task result published"),
                Err(e) => tracing::error!(task = %self.task, "{}", e),
            },
            Ok(Err(e)) => {
                tracing::error!(task = %self.task, "Task body failed: {}", e);
            }
            Err(e) if e.is_panic() => {
                tracing::error!(task = %self.task, "Task body panicked");
                failure_code = EXIT_PANIC;
            }
            Err(e) => {
                tracing::error!(task = %self.task, "Task body was cancelled: {}", e);
            }
        }

        slot.seal();

        let code = if slot.is_empty() {
            tracing::warn!(task = %self.task, "Exiting without a published result");
            failure_code
        } else {
            tokio::select! {
                _ = release.notified() => {
                    tracing::debug!(task = %self.task, "Result collected, exiting");
                }
                _ = tokio::time::sleep(self.linger) => {
                    tracing::warn!(
                        task = %self.task,
                        linger_secs = self.linger.as_secs(),
                        "Result was not collected, exiting"
                    );
                }
            }
            0
        };

        server_handle.abort();
        if let Err(e) = paths::remove_endpoint(&endpoint) {
            tracing::debug!(task = %self.task, "Could not remove endpoint: {}", e);
        }
        code
    }
}

/// Write the startup signal as the first line on stdout
fn announce(endpoint: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", common::startup_signal(endpoint))?;
    stdout.flush()
}

/// Entry point for task executables.
///
/// Reads the launcher-provided environment, sets up logging and a tokio
/// runtime, runs `body` in the harness and exits with its code.
pub fn main<F, Fut, E>(body: F) -> !
where
    F: FnOnce(TaskContext) -> Fut,
    Fut: Future<Output = std::result::Result<TaskResult, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let harness = match Harness::from_env() {
        Ok(harness) => harness,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_SETUP_FAILED);
        }
    };

    let log_guard = logging::init_runtime(harness.task());

    let code = match tokio::runtime::Runtime::new() {
        Ok(runtime) => {
            let code = runtime.block_on(harness.run(body));
            runtime.shutdown_timeout(Duration::from_millis(100));
            code
        }
        Err(e) => {
            tracing::error!("Failed to start tokio runtime: {}", e);
            EXIT_SETUP_FAILED
        }
    };

    // Flush the log file before exiting
    drop(log_guard);
    std::process::exit(code)
}
