//! Task manifest
//!
//! The manifest is a YAML catalog of every known task and its scheduling
//! metadata:
//!
//! ```yaml
//! tasks:
//!   boot-time:
//!     description: Cold boot reaches the launcher
//!     stage: android
//!     required_agent_capabilities: [adb]
//!     timeout_secs: 300
//!     device: pixel-7
//!     command: bin/boot-time
//!     args: ["--cold"]
//! ```
//!
//! Declaration order is preserved; it is the order tasks run in.

mod registry;
mod selector;

pub use registry::{LaunchSpec, TaskRegistry};
pub use selector::{select, AgentCapabilities, Plan, Selection, Skipped};

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Static descriptor of one task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    /// Unique key, also the registry key for its executable
    pub name: String,
    /// Free text, informational only
    pub description: String,
    /// Device family / environment tag
    pub stage: String,
    /// Capabilities the executing agent must have
    pub required_capabilities: BTreeSet<String>,
    /// Deadline override for this task
    pub timeout: Option<Duration>,
    /// Physical device the task needs exclusive access to
    pub device: Option<String>,
    /// Executable to launch; defaults to `<tasks_dir>/<name>`
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            stage: stage.into(),
            required_capabilities: BTreeSet::new(),
            timeout: None,
            device: None,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// One entry as written in the manifest file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TaskEntry {
    #[serde(default)]
    description: String,
    stage: String,
    #[serde(default)]
    required_agent_capabilities: Vec<String>,
    timeout_secs: Option<u64>,
    device: Option<String>,
    command: Option<PathBuf>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct ManifestFile {
    #[serde(default)]
    tasks: TaskEntries,
}

/// The `tasks` mapping as written, repeated keys included.
///
/// `serde_yaml::Mapping` refuses a repeated key with a generic parse error;
/// collecting the pairs ourselves lets a repeated task name be reported as
/// such.
#[derive(Debug, Default)]
struct TaskEntries(Vec<(serde_yaml::Value, serde_yaml::Value)>);

impl<'de> Deserialize<'de> for TaskEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
            type Value = TaskEntries;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a mapping of task name to task entry")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(TaskEntries::default())
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(pair) = map.next_entry()? {
                    entries.push(pair);
                }
                Ok(TaskEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

/// The loaded task catalog
#[derive(Debug, Clone)]
pub struct Manifest {
    tasks: Vec<TaskDefinition>,
    base_dir: PathBuf,
}

impl Manifest {
    /// Load a manifest file; relative commands resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let mut manifest = Self::from_yaml(&content, &path.display().to_string())?;
        manifest.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(manifest)
    }

    /// Parse a manifest from YAML text; `origin` names it in errors
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self> {
        let parse_error = |reason: String| Error::ManifestParse {
            path: origin.to_string(),
            reason,
        };

        let file: ManifestFile =
            serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(file.tasks.0.len());

        for (key, value) in file.tasks.0 {
            let name = key
                .as_str()
                .ok_or_else(|| parse_error(format!("task name must be a string, got {:?}", key)))?
                .to_string();

            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateTask(name));
            }

            let entry: TaskEntry = serde_yaml::from_value(value)
                .map_err(|e| parse_error(format!("task '{}': {}", name, e)))?;

            tasks.push(TaskDefinition {
                name,
                description: entry.description,
                stage: entry.stage,
                required_capabilities: entry.required_agent_capabilities.into_iter().collect(),
                timeout: entry.timeout_secs.map(Duration::from_secs),
                device: entry.device,
                command: entry.command,
                args: entry.args,
                env: entry.env,
            });
        }

        Ok(Self {
            tasks,
            base_dir: PathBuf::from("."),
        })
    }

    /// All tasks in declaration order
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Directory relative commands are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
