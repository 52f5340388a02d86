//! hwtask - process-isolated task runner for hardware test suites
//!
//! Runs each selected task of a manifest in its own runtime process and
//! collects its result over a local inspection channel, so a task that
//! hangs or crashes only ever fails itself.

use std::path::PathBuf;

use clap::Parser;
use hwtask::cli::{self, EXIT_PREFLIGHT};
use hwtask::commands::Commands;
use hwtask::common::logging;

#[derive(Parser)]
#[command(name = "hwtask", about = "Process-isolated task runner for hardware tests")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/hwtask/config.toml)
    #[arg(long, global = true, env = "HWTASK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse();

    match cli::dispatch(cli.command, cli.config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_PREFLIGHT);
        }
    }
}
