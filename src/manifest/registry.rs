//! Task executable registry
//!
//! Maps every task name to the executable that hosts it. Built once from the
//! manifest and validated for the selected tasks before any of them runs.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

use super::{Manifest, Plan};

/// How to start the runtime process for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Whether the program is looked up on PATH rather than by location
    fn is_bare(&self) -> bool {
        let mut components = self.program.components();
        matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        )
    }

    /// Find the executable this spec would start
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.is_bare() {
            which::which(&self.program).ok()
        } else if self.program.is_file() {
            Some(self.program.clone())
        } else {
            None
        }
    }
}

/// Name → launch specification
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    specs: HashMap<String, LaunchSpec>,
}

impl TaskRegistry {
    /// Build the registry for every task in the manifest
    ///
    /// A task's `command` is used as given when it is a bare program name
    /// (looked up on PATH) and resolved against the manifest directory
    /// otherwise. Tasks without a command run `<tasks_dir>/<name>`, with
    /// `tasks_dir` defaulting to the manifest directory.
    pub fn build(manifest: &Manifest, tasks_dir: Option<&Path>) -> Self {
        let base = manifest.base_dir();
        let tasks_dir = match tasks_dir {
            Some(dir) if dir.is_relative() => base.join(dir),
            Some(dir) => dir.to_path_buf(),
            None => base.to_path_buf(),
        };

        let specs = manifest
            .tasks()
            .iter()
            .map(|task| {
                let program = match &task.command {
                    Some(command) => {
                        let spec = LaunchSpec::new(command.clone());
                        if spec.is_bare() || command.is_absolute() {
                            command.clone()
                        } else {
                            base.join(command)
                        }
                    }
                    None => tasks_dir.join(&task.name),
                };

                let spec = LaunchSpec {
                    program,
                    args: task.args.clone(),
                    env: task.env.clone(),
                };
                (task.name.clone(), spec)
            })
            .collect();

        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&LaunchSpec> {
        self.specs.get(name)
    }

    /// Register or replace a launch specification
    pub fn insert(&mut self, name: impl Into<String>, spec: LaunchSpec) {
        self.specs.insert(name.into(), spec);
    }

    /// Check that every queued task has a launchable executable
    pub fn validate(&self, plan: &Plan) -> Result<()> {
        for task in &plan.queue {
            let spec = self
                .specs
                .get(&task.name)
                .ok_or_else(|| Error::UnknownTask(task.name.clone()))?;

            if spec.resolve().is_none() {
                return Err(Error::MissingExecutable {
                    task: task.name.clone(),
                    program: spec.program.display().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{select, AgentCapabilities, Selection};

    fn write_manifest(dir: &Path, content: &str) -> Manifest {
        let path = dir.join("hwtask.yaml");
        std::fs::write(&path, content).unwrap();
        Manifest::load(&path).unwrap()
    }

    #[test]
    fn test_default_program_is_named_after_task() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), "tasks:\n  boot:\n    stage: s\n");

        let registry = TaskRegistry::build(&manifest, Some(Path::new("bin")));
        assert_eq!(
            registry.get("boot").unwrap().program,
            dir.path().join("bin").join("boot")
        );

        let registry = TaskRegistry::build(&manifest, None);
        assert_eq!(registry.get("boot").unwrap().program, dir.path().join("boot"));
    }

    #[test]
    fn test_relative_command_resolves_against_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(
            dir.path(),
            "tasks:\n  a:\n    stage: s\n    command: tools/a\n    args: [x]\n  b:\n    stage: s\n    command: sh\n",
        );

        let registry = TaskRegistry::build(&manifest, None);
        let a = registry.get("a").unwrap();
        assert_eq!(a.program, dir.path().join("tools/a"));
        assert_eq!(a.args, vec!["x"]);
        assert_eq!(registry.get("b").unwrap().program, PathBuf::from("sh"));
    }

    #[test]
    fn test_validate_reports_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), "tasks:\n  ghost:\n    stage: s\n");
        let registry = TaskRegistry::build(&manifest, None);
        let plan = select(&manifest, &Selection::default(), &AgentCapabilities::default()).unwrap();

        let err = registry.validate(&plan).unwrap_err();
        assert!(matches!(err, Error::MissingExecutable { task, .. } if task == "ghost"));
    }

    #[test]
    fn test_validate_accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present"), "").unwrap();
        let manifest = write_manifest(dir.path(), "tasks:\n  present:\n    stage: s\n");
        let registry = TaskRegistry::build(&manifest, None);
        let plan = select(&manifest, &Selection::default(), &AgentCapabilities::default()).unwrap();

        registry.validate(&plan).unwrap();
    }
}
