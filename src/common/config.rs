//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Capabilities of the machine running the suite
    #[serde(default)]
    pub agent: AgentConfig,

    /// Scheduling and manifest settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Where to hand the final report
    #[serde(default)]
    pub report: ReportConfig,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Default deadline for a task that does not set its own
    #[serde(default = "default_task")]
    pub task_secs: u64,

    /// How long a runtime process has to announce its inspection endpoint
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,

    /// How long a runtime process has to exit after its result was collected
    #[serde(default = "default_release_grace")]
    pub release_grace_secs: u64,

    /// How long a runtime process keeps its result available without a release
    #[serde(default = "default_linger")]
    pub linger_secs: u64,

    /// Deadline for the whole run
    #[serde(default)]
    pub run_secs: Option<u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            task_secs: default_task(),
            startup_grace_secs: default_startup_grace(),
            release_grace_secs: default_release_grace(),
            linger_secs: default_linger(),
            run_secs: None,
        }
    }
}

fn default_task() -> u64 {
    600
}
fn default_startup_grace() -> u64 {
    10
}
fn default_release_grace() -> u64 {
    5
}
fn default_linger() -> u64 {
    30
}

impl Timeouts {
    pub fn task(&self) -> Duration {
        Duration::from_secs(self.task_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(self.release_grace_secs)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.linger_secs)
    }

    pub fn run(&self) -> Option<Duration> {
        self.run_secs.map(Duration::from_secs)
    }
}

/// Execution agent settings
#[derive(Debug, Deserialize, Default)]
pub struct AgentConfig {
    /// Capability tags this machine satisfies (e.g. "android", "camera")
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

/// Runner settings
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of task processes running at once
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Manifest path used when none is given on the command line
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Directory holding task executables named after their task
    #[serde(default)]
    pub tasks_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            manifest: default_manifest(),
            tasks_dir: None,
        }
    }
}

fn default_jobs() -> usize {
    1
}
fn default_manifest() -> PathBuf {
    PathBuf::from("hwtask.yaml")
}

/// Report settings
#[derive(Debug, Deserialize, Default)]
pub struct ReportConfig {
    /// Write the JSON report to this file
    #[serde(default)]
    pub json_path: Option<PathBuf>,

    /// POST the JSON report to this dashboard endpoint
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
