//! Logging and tracing configuration
//!
//! The runner logs to stderr. Task runtime processes log to stderr (which
//! the launcher forwards) and to a per-task file, because stdout is
//! reserved for the startup signal.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for the runner (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hwtask=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing inside a task runtime process
///
/// Logs go to stderr and, when the log directory is available, to
/// `<data dir>/logs/tasks/<task>.log`. The returned guard must be held
/// until the process exits so buffered lines are flushed.
pub fn init_runtime(task: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hwtask=debug,info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact();

    if let Some(dir) = task_log_dir() {
        if std::fs::create_dir_all(&dir).is_ok() {
            let appender = tracing_appender::rolling::never(&dir, format!("{}.log", paths::safe_name(task)));
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .is_ok();

            return installed.then_some(guard);
        }
    }

    // Fallback: stderr only
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
    None
}

/// Directory holding per-task runtime logs
pub fn task_log_dir() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join("tasks"))
}
