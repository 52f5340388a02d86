//! CLI command handling
//!
//! Turns parsed commands into a plan, runs it and maps the outcome to an
//! exit status. Everything before the first task starts is pre-flight: a
//! failure there is an error and nothing is spawned.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::{Commands, SelectArgs};
use crate::common::config::Config;
use crate::common::Result;
use crate::coordinator::{self, HttpSink, JsonFileSink, ResultSink, RunCoordinator};
use crate::manifest::{self, AgentCapabilities, Manifest, Plan, Selection, TaskRegistry};

/// Exit status when every selected task succeeded
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status when at least one task failed
pub const EXIT_TASKS_FAILED: i32 = 1;
/// Exit status for pre-flight and usage errors
pub const EXIT_PREFLIGHT: i32 = 2;

/// Dispatch a CLI command and return the process exit status
pub async fn dispatch(command: Commands, config_path: Option<PathBuf>) -> Result<i32> {
    let mut config = load_config(config_path.as_deref())?;

    match command {
        Commands::Run {
            select,
            jobs,
            timeout,
            run_timeout,
            report,
            dashboard,
            json,
        } => {
            if let Some(jobs) = jobs {
                config.runner.jobs = jobs;
            }
            if let Some(secs) = timeout {
                config.timeouts.task_secs = secs;
            }
            if run_timeout.is_some() {
                config.timeouts.run_secs = run_timeout;
            }
            if report.is_some() {
                config.report.json_path = report;
            }
            if dashboard.is_some() {
                config.report.dashboard_url = dashboard;
            }

            let (manifest, plan) = prepare(&config, &select)?;
            let registry = TaskRegistry::build(&manifest, config.runner.tasks_dir.as_deref());
            registry.validate(&plan)?;

            if !json {
                print_plan_header(&plan);
            }

            let report = RunCoordinator::from_config(&config, registry).run(&plan).await;

            coordinator::deliver(&sinks(&config), &report).await;

            if json {
                println!("{}", report.to_json_pretty()?);
                if !report.success() {
                    eprintln!("Failing: {}", report.failing().join(", "));
                }
            } else {
                report.print_summary(&plan.skipped);
            }

            Ok(if report.success() {
                EXIT_SUCCESS
            } else {
                EXIT_TASKS_FAILED
            })
        }

        Commands::List { select } => {
            let (_, plan) = prepare(&config, &select)?;
            print_plan(&plan);
            Ok(EXIT_SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// Load the manifest and select the tasks to run
fn prepare(config: &Config, args: &SelectArgs) -> Result<(Manifest, Plan)> {
    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.runner.manifest.clone());
    let manifest = Manifest::load(&manifest_path)?;

    let mut agent = AgentCapabilities::new(config.agent.capabilities.iter().cloned());
    agent.extend(args.capabilities.iter().cloned());

    let selection = Selection {
        names: args.tasks.clone(),
        stage: args.stage.clone(),
        run_all: args.all,
    };

    tracing::debug!(manifest = %manifest_path.display(), ?selection, "Selecting tasks");
    let plan = manifest::select(&manifest, &selection, &agent)?;
    Ok((manifest, plan))
}

fn sinks(config: &Config) -> Vec<Box<dyn ResultSink>> {
    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();

    if let Some(path) = &config.report.json_path {
        sinks.push(Box::new(JsonFileSink::new(path)));
    }
    if let Some(url) = &config.report.dashboard_url {
        match HttpSink::new(url) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => tracing::warn!("Dashboard upload disabled: {}", e),
        }
    }

    sinks
}

fn print_plan_header(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No tasks selected".yellow());
        return;
    }
    println!(
        "{} {}",
        "Running".blue().bold(),
        format!("{} task(s): {}", plan.queue.len(), plan.names().join(", ")).white()
    );
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() && plan.skipped.is_empty() {
        println!("No tasks selected");
        return;
    }

    for task in &plan.queue {
        let mut line = format!("  {} {}", task.name.bold(), format!("[{}]", task.stage).cyan());
        if let Some(device) = &task.device {
            line.push_str(&format!(" {}", format!("device={}", device).dimmed()));
        }
        println!("{}", line);
        if !task.description.is_empty() {
            println!("      {}", task.description.dimmed());
        }
    }

    for skip in &plan.skipped {
        println!(
            "  {} {}",
            skip.name.dimmed(),
            format!("(skipped, missing: {})", skip.missing.join(", ")).yellow()
        );
    }
}
