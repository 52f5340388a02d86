//! Launcher-side inspection client for talking to a task runtime process

use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::launcher::process::{describe_exit, TaskProcess};
use crate::result::TaskResult;

use super::protocol::{Command, Request, Response, StatusResult};
use super::transport::{self, Stream};

/// Delay between connection attempts once the endpoint is known
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// How long to wait for an exit status after the channel closed
const EXIT_STATUS_GRACE: Duration = Duration::from_secs(2);

/// Connected inspection channel to one runtime process
pub struct InspectionClient {
    task: String,
    endpoint: String,
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

impl InspectionClient {
    /// Connect to the process's inspection endpoint.
    ///
    /// The endpoint comes from the process's startup signal. Fails with
    /// [`Error::Connection`] when the signal or the connection does not
    /// happen within `grace`, including when the process dies first.
    pub async fn connect(process: &mut TaskProcess, grace: Duration) -> Result<Self> {
        let task = process.task().to_string();
        let deadline = Instant::now() + grace;

        let endpoint = match tokio::time::timeout_at(deadline, process.read_startup_signal()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::connection(
                    &task,
                    format!("no startup signal within {}s", grace.as_secs()),
                ))
            }
        };

        loop {
            match transport::connect(&endpoint).await {
                Ok(stream) => {
                    tracing::debug!(task = %task, %endpoint, "Connected to inspection endpoint");
                    let (reader, writer) = tokio::io::split(stream);
                    return Ok(Self {
                        task,
                        endpoint,
                        reader,
                        writer,
                        next_id: 1,
                    });
                }
                Err(e) => {
                    if Instant::now() + CONNECT_RETRY >= deadline {
                        return Err(Error::connection(&task, format!("connect to {}: {}", endpoint, e)));
                    }
                    if let Some(status) = process.try_exit() {
                        return Err(Error::connection(
                            &task,
                            format!("process {} before accepting connections", describe_exit(&status)),
                        ));
                    }
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a command and wait for the response
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };
        let json = serde_json::to_vec(&request)?;

        transport::send_message(&mut self.writer, &json)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        let response_data = transport::recv_message(&mut self.reader)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        let response: Response = serde_json::from_slice(&response_data)?;

        if response.id != id {
            return Err(Error::Channel(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| crate::common::error::IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(error.into())
        }
    }

    /// Wait until the task publishes its result, the process exits, or the
    /// deadline passes, whichever happens first.
    ///
    /// Exactly one outcome: `Ok(result)`, `Err(Error::Timeout)` or
    /// `Err(Error::ProcessExited)`. Nothing is polled; the socket read, the
    /// child's exit and the timer are awaited together.
    pub async fn await_result(
        &mut self,
        process: &mut TaskProcess,
        deadline: Instant,
        budget: Duration,
    ) -> Result<TaskResult> {
        let outcome = tokio::select! {
            response = self.send_command(Command::AwaitResult) => Collected::Response(response),
            status = process.wait_exit() => Collected::Exited(status),
            _ = tokio::time::sleep_until(deadline) => Collected::Deadline,
        };

        match outcome {
            Collected::Response(Ok(value)) => {
                let result: TaskResult = serde_json::from_value(value)?;
                Ok(result.normalized())
            }
            Collected::Response(Err(Error::Channel(reason))) => {
                // The channel dropped; the process is going or gone
                tracing::debug!(task = %self.task, %reason, "Inspection channel closed");
                match tokio::time::timeout(EXIT_STATUS_GRACE, process.wait_exit()).await {
                    Ok(Ok(status)) => Err(Error::ProcessExited(describe_exit(&status))),
                    _ => Err(Error::ProcessExited("closed its inspection channel".to_string())),
                }
            }
            Collected::Response(Err(e)) => Err(e),
            Collected::Exited(Ok(status)) => Err(Error::ProcessExited(describe_exit(&status))),
            Collected::Exited(Err(e)) => Err(Error::ProcessExited(format!("could not be waited on ({})", e))),
            Collected::Deadline => Err(Error::Timeout(budget.as_secs_f64().round() as u64)),
        }
    }

    /// Query what the runtime process is doing
    pub async fn status(&mut self) -> Result<StatusResult> {
        let value = self.send_command(Command::Status).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Tell the runtime process its result was collected
    pub async fn release(&mut self) -> Result<()> {
        self.send_command(Command::Release).await.map(|_| ())
    }
}

/// Which of the concurrent waits in `await_result` finished first
enum Collected {
    Response(Result<serde_json::Value>),
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
}
