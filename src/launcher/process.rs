//! Task runtime process handle
//!
//! A [`TaskProcess`] exclusively owns one spawned runtime process. It reads
//! the startup signal, forwards the remaining output to tracing, observes
//! the exit, and force-terminates the process (and its process group on
//! Unix) exactly once.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::common::{self, paths, Error, Result};
use crate::manifest::LaunchSpec;

/// Environment variable carrying the task name into the runtime process
pub const ENV_TASK: &str = "HWTASK_TASK";
/// Environment variable carrying the device lock key
pub const ENV_DEVICE: &str = "HWTASK_DEVICE";
/// Environment variable carrying how long to wait for a release
pub const ENV_LINGER_SECS: &str = "HWTASK_LINGER_SECS";

/// How long to wait for an exit status after the process closed a pipe
const EXIT_STATUS_GRACE: Duration = Duration::from_secs(1);

/// Settings passed from the launcher to a runtime process
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    pub device: Option<String>,
    pub linger: Option<Duration>,
}

/// Owned handle to one task runtime process
pub struct TaskProcess {
    task: String,
    child: Child,
    pid: Option<u32>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    endpoint: Option<String>,
    exit: Option<ExitStatus>,
    terminated: bool,
}

impl TaskProcess {
    /// Spawn the runtime process for `task`
    pub fn spawn(task: &str, spec: &LaunchSpec, env: &RuntimeEnv) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .env(ENV_TASK, task)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(device) = &env.device {
            cmd.env(ENV_DEVICE, device);
        }
        if let Some(linger) = env.linger {
            cmd.env(ENV_LINGER_SECS, linger.as_secs().to_string());
        }

        // Own process group so helpers the task starts die with it
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(task, format!("{}: {}", spec.program.display(), e)))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn(task, "failed to capture stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_lines(task.to_string(), "stderr", BufReader::new(stderr).lines());
        }

        tracing::debug!(task, pid, program = %spec.program.display(), "Spawned runtime process");

        Ok(Self {
            task: task.to_string(),
            child,
            pid,
            stdout: Some(BufReader::new(stdout).lines()),
            endpoint: None,
            exit: None,
            terminated: false,
        })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Inspection endpoint announced by the process, once read
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Read stdout until the startup signal and return the endpoint.
    ///
    /// Lines before the signal are forwarded to the log. After the signal
    /// the rest of stdout is drained in the background so the task never
    /// blocks on a full pipe.
    pub async fn read_startup_signal(&mut self) -> Result<String> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }

        let mut lines = self
            .stdout
            .take()
            .ok_or_else(|| Error::connection(&self.task, "stdout already consumed"))?;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(endpoint) = common::parse_startup_signal(&line) {
                        tracing::debug!(task = %self.task, %endpoint, "Runtime announced endpoint");
                        forward_lines(self.task.clone(), "stdout", lines);
                        self.endpoint = Some(endpoint.clone());
                        return Ok(endpoint);
                    }
                    tracing::debug!(task = %self.task, stream = "stdout", "{}", line);
                }
                Ok(None) => {
                    let reason = match tokio::time::timeout(EXIT_STATUS_GRACE, self.wait_exit()).await {
                        Ok(Ok(status)) => format!("process {} during startup", describe_exit(&status)),
                        _ => "process closed stdout during startup".to_string(),
                    };
                    return Err(Error::connection(&self.task, reason));
                }
                Err(e) => {
                    return Err(Error::connection(&self.task, format!("reading stdout: {}", e)));
                }
            }
        }
    }

    /// Wait for the process to exit; cancel safe, caches the status
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exit = Some(status);
        Ok(status)
    }

    /// Exit status if the process has already exited
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait().ok().flatten();
        }
        self.exit
    }

    /// Whether the process is known to be gone
    pub fn has_exited(&mut self) -> bool {
        self.try_exit().is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Force-kill the process and reap it.
    ///
    /// Idempotent: only the first call acts; later calls, and calls on a
    /// process that already exited, change nothing and never fail.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // An unreaped leader still holds the group id, so the group kill
        // cannot hit an unrelated process.
        #[cfg(unix)]
        if let (Some(pid), Some(_)) = (self.pid, self.child.id()) {
            kill_group(pid);
        }

        if self.try_exit().is_none() {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(task = %self.task, "Failed to kill runtime process: {}", e);
            }
            self.exit = self.child.try_wait().ok().flatten();
            tracing::debug!(task = %self.task, pid = self.pid, "Terminated runtime process");
        }

        if let Some(endpoint) = &self.endpoint {
            if let Err(e) = paths::remove_endpoint(endpoint) {
                tracing::debug!(task = %self.task, %endpoint, "Could not remove endpoint: {}", e);
            }
        }
    }
}

/// Send SIGKILL to every process in the group led by `pid`
#[cfg(unix)]
fn kill_group(pid: u32) {
    // Negative pid addresses the process group
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pid, "Process group kill failed: {}", err);
        }
    }
}

/// Human-readable exit description, e.g. "exited with code 1"
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("was killed by signal {}", signal);
        }
    }

    "exited".to_string()
}

/// Drain a child pipe into the log in the background
fn forward_lines<R>(task: String, stream: &'static str, mut lines: Lines<R>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(task = %task, stream, "{}", line);
        }
    });
}
