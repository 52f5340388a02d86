//! Inspection server - answers the launcher from inside a runtime process

use std::sync::Arc;
use std::time::{Duration, Instant};

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::Notify;

use crate::common::error::IpcError;
use crate::common::Result;
use crate::ipc::protocol::{Command, Request, Response, StatusResult};
use crate::ipc::transport;

use super::slot::ResultSlot;

/// Inspection server state shared by all connections
pub struct InspectionServer {
    task: String,
    slot: ResultSlot,
    release: Arc<Notify>,
    started: Instant,
}

impl InspectionServer {
    pub fn new(task: &str, slot: ResultSlot, release: Arc<Notify>) -> Self {
        Self {
            task: task.to_string(),
            slot,
            release,
            started: Instant::now(),
        }
    }

    /// Accept connections until the process exits
    pub async fn serve(self: Arc<Self>, listener: transport::Listener) {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream).await {
                            tracing::warn!(task = %server.task, "Error handling inspection client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(task = %self.task, "Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(&self, stream: transport::Stream) -> Result<()> {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        loop {
            let request_data = match transport::recv_message(&mut reader).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::debug!(task = %self.task, "Inspection client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::error!(task = %self.task, "Error reading request: {}", e);
                    break;
                }
            };

            let request: Request = match serde_json::from_slice(&request_data) {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(task = %self.task, "Invalid request: {}", e);
                    let response = Response::error(
                        0,
                        IpcError {
                            code: "INVALID_REQUEST".to_string(),
                            message: e.to_string(),
                        },
                    );
                    let json = serde_json::to_vec(&response)?;
                    transport::send_message(&mut writer, &json).await?;
                    continue;
                }
            };

            tracing::debug!(task = %self.task, "Received command: {:?}", request.command);

            let response = match self.handle_command(request.id, request.command).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(task = %self.task, "Command failed: {}", e);
                    Response::error(request.id, IpcError::from(&e))
                }
            };
            let json = serde_json::to_vec(&response)?;
            transport::send_message(&mut writer, &json).await?;
        }

        Ok(())
    }

    async fn handle_command(&self, id: u64, command: Command) -> Result<Response> {
        let response = match command {
            Command::Status => {
                let status = StatusResult {
                    task: self.task.clone(),
                    pid: std::process::id(),
                    phase: self.slot.snapshot().phase(),
                    uptime_ms: self.started.elapsed().as_millis() as u64,
                };
                Response::success(id, serde_json::to_value(status)?)
            }
            Command::AwaitResult => {
                let result = self.slot.wait_reported().await;
                Response::success(id, serde_json::to_value(result)?)
            }
            Command::Release => {
                self.release.notify_one();
                Response::ok(id)
            }
        };
        Ok(response)
    }
}
