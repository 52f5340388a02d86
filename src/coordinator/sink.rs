//! Result sinks - where a finished run report goes

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Error, Result};

use super::report::RunReport;

/// Upload timeout for the dashboard sink
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination for a run report
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Hand over the report
    async fn send(&self, report: &RunReport) -> Result<()>;
}

/// Writes the report as pretty JSON to a file
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn send(&self, report: &RunReport) -> Result<()> {
        let json = report.to_json_pretty()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await.map_err(|e| Error::Sink {
            sink: self.name().to_string(),
            reason: format!("{}: {}", self.path.display(), e),
        })?;

        tracing::info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}

/// POSTs the report JSON to a dashboard endpoint
#[derive(Debug, Clone)]
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("hwtask/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ResultSink for HttpSink {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn send(&self, report: &RunReport) -> Result<()> {
        let sink_error = |reason: String| Error::Sink {
            sink: "dashboard".to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| sink_error(format!("POST {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(sink_error(format!(
                "POST {} returned status {}",
                self.url,
                response.status()
            )));
        }

        tracing::info!(url = %self.url, "Report uploaded");
        Ok(())
    }
}

/// Hand the report to every sink. Failures are logged and otherwise
/// ignored; they never change the run's verdict.
pub async fn deliver(sinks: &[Box<dyn ResultSink>], report: &RunReport) {
    for sink in sinks {
        if let Err(e) = sink.send(report).await {
            tracing::warn!(sink = sink.name(), "{}", e);
        }
    }
}
