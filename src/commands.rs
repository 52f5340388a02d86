//! CLI command definitions
//!
//! Defines the clap commands for the hwtask CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the selected tasks, each in its own process
    Run {
        #[command(flatten)]
        select: SelectArgs,

        /// Maximum number of tasks running at once (default: 1)
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Deadline in seconds for tasks that do not set their own
        #[arg(long)]
        timeout: Option<u64>,

        /// Deadline in seconds for the whole run
        #[arg(long)]
        run_timeout: Option<u64>,

        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// POST the JSON report to this dashboard URL
        #[arg(long)]
        dashboard: Option<String>,

        /// Print the JSON report to stdout instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// Show which tasks would run on this machine
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        select: SelectArgs,
    },
}

/// Task selection flags shared by `run` and `list`
#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Task to select; can be given multiple times (default: all tasks)
    #[arg(long = "task", short = 't')]
    pub tasks: Vec<String>,

    /// Only select tasks of this stage
    #[arg(long, short)]
    pub stage: Option<String>,

    /// Select every task, ignoring --task
    #[arg(long)]
    pub all: bool,

    /// Capability this machine has, in addition to the configured ones
    #[arg(long = "capability", short = 'c')]
    pub capabilities: Vec<String>,

    /// Manifest file (default: from config, else ./hwtask.yaml)
    #[arg(long, short)]
    pub manifest: Option<PathBuf>,
}
