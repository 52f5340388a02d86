//! Task selection
//!
//! Turns the manifest plus the invocation's filters into the ordered queue
//! of tasks to run.

use std::collections::BTreeSet;

use crate::common::{Error, Result};

use super::{Manifest, TaskDefinition};

/// Filters given on the command line
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Explicit task names; empty means no name filter
    pub names: Vec<String>,
    /// Only tasks of this stage
    pub stage: Option<String>,
    /// Ignore `names` and take everything the other filters allow
    pub run_all: bool,
}

/// Capability tags of the machine executing the suite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCapabilities(BTreeSet<String>);

impl AgentCapabilities {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Tags from `required` this agent lacks, in sorted order
    pub fn missing(&self, required: &BTreeSet<String>) -> Vec<String> {
        required.difference(&self.0).cloned().collect()
    }

    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Add tags, e.g. from command-line flags on top of the config file
    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(tags.into_iter().map(Into::into));
    }
}

/// A task that matched the name and stage filters but cannot run here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub name: String,
    pub missing: Vec<String>,
}

/// Outcome of selection
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Tasks to run, in manifest declaration order
    pub queue: Vec<TaskDefinition>,
    /// Tasks dropped for missing agent capabilities
    pub skipped: Vec<Skipped>,
}

impl Plan {
    pub fn names(&self) -> Vec<&str> {
        self.queue.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Select the tasks to run
///
/// A task is selected iff it matches the name filter (unless `run_all`),
/// the stage filter, and its required capabilities are a subset of the
/// agent's. Fails with [`Error::UnknownTask`] when an explicit name is not
/// in the manifest, before anything is selected.
pub fn select(manifest: &Manifest, selection: &Selection, agent: &AgentCapabilities) -> Result<Plan> {
    let names: BTreeSet<&str> = if selection.run_all {
        BTreeSet::new()
    } else {
        selection.names.iter().map(String::as_str).collect()
    };

    if let Some(unknown) = names.iter().find(|name| !manifest.contains(name)) {
        return Err(Error::UnknownTask(unknown.to_string()));
    }

    let mut plan = Plan::default();

    for task in manifest.tasks() {
        if !names.is_empty() && !names.contains(task.name.as_str()) {
            continue;
        }
        if let Some(stage) = &selection.stage {
            if &task.stage != stage {
                continue;
            }
        }

        if agent.satisfies(&task.required_capabilities) {
            plan.queue.push(task.clone());
        } else {
            let missing = agent.missing(&task.required_capabilities);
            tracing::debug!(task = %task.name, ?missing, "Skipping task, agent lacks capabilities");
            plan.skipped.push(Skipped {
                name: task.name.clone(),
                missing,
            });
        }
    }

    Ok(plan)
}
