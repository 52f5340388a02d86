//! Run report
//!
//! Ordered map of task name to its final record. Serializes as a JSON
//! object whose keys follow queue order.

use colored::Colorize;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::launcher::{RunState, TaskOutcome};
use crate::manifest::Skipped;
use crate::result::{FailureKind, Outcome, TaskResult};

/// Final record of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub outcome: Outcome,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub state: RunState,
    pub elapsed_ms: u64,
}

impl ReportEntry {
    fn from_result(result: &TaskResult, state: RunState, elapsed_ms: u64) -> Self {
        Self {
            outcome: result.outcome(),
            data: result.data().clone(),
            failure_detail: result.failure_detail().map(str::to_string),
            failure_kind: result.failure_kind(),
            state,
            elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl From<&TaskOutcome> for ReportEntry {
    fn from(outcome: &TaskOutcome) -> Self {
        Self::from_result(&outcome.result, outcome.state, outcome.elapsed.as_millis() as u64)
    }
}

/// Results of one run, keyed by task name in queue order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    entries: Vec<(String, ReportEntry)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task's outcome; a name recorded twice keeps its position
    /// and takes the newer entry
    pub fn record(&mut self, outcome: &TaskOutcome) {
        let entry = ReportEntry::from(outcome);
        match self.entries.iter_mut().find(|(name, _)| *name == outcome.name) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((outcome.name.clone(), entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entry)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReportEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every recorded task succeeded
    pub fn success(&self) -> bool {
        self.entries.iter().all(|(_, entry)| entry.is_success())
    }

    /// Names of failed tasks, in queue order
    pub fn failing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print the human-readable summary to stdout
    pub fn print_summary(&self, skipped: &[Skipped]) {
        println!("\n{}", "Results:".blue().bold());

        for (name, entry) in self.iter() {
            let elapsed = format!("({:.1}s)", entry.elapsed_ms as f64 / 1000.0);
            if entry.is_success() {
                println!("  {} {} {}", "✓".green(), name, elapsed.dimmed());
                if !entry.data.is_empty() {
                    let data = Value::Object(entry.data.clone());
                    println!("      {}", data.to_string().dimmed());
                }
            } else {
                println!("  {} {} {}", "✗".red(), name.red(), elapsed.dimmed());
                if let Some(detail) = &entry.failure_detail {
                    println!("      {}", detail);
                }
            }
        }

        for skip in skipped {
            println!(
                "  {} {} {}",
                "-".yellow(),
                skip.name.dimmed(),
                format!("(skipped, missing: {})", skip.missing.join(", ")).dimmed()
            );
        }

        let failing = self.failing();
        println!();
        if failing.is_empty() {
            println!(
                "{} {}",
                "✓".green().bold(),
                format!("{} task(s) passed", self.len()).green().bold()
            );
        } else {
            println!(
                "{} {}",
                "✗".red().bold(),
                format!("{} of {} task(s) failed", failing.len(), self.len()).red().bold()
            );
            println!("  Failing: {}", failing.join(", "));
        }
    }
}

impl Serialize for RunReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(name: &str, result: TaskResult, state: RunState) -> TaskOutcome {
        TaskOutcome {
            name: name.to_string(),
            pid: None,
            state,
            result,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_report_keeps_queue_order() {
        let mut report = RunReport::new();
        report.record(&outcome("zeta", TaskResult::success(), RunState::Completed));
        report.record(&outcome("alpha", TaskResult::success(), RunState::Completed));

        let json = report.to_json_pretty().unwrap();
        assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
        assert_eq!(report.names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_success_and_failing() {
        let mut report = RunReport::new();
        assert!(report.success());

        report.record(&outcome(
            "t1",
            TaskResult::success().with_data("latency_ms", 42),
            RunState::Completed,
        ));
        report.record(&outcome(
            "t2",
            TaskResult::failure_of(FailureKind::Timeout, "exceeded 2s timeout"),
            RunState::TimedOut,
        ));

        assert!(!report.success());
        assert_eq!(report.failing(), vec!["t2"]);
    }

    #[test]
    fn test_entry_serialization() {
        let mut report = RunReport::new();
        report.record(&outcome(
            "t1",
            TaskResult::success().with_data("latency_ms", 42),
            RunState::Completed,
        ));
        report.record(&outcome(
            "t2",
            TaskResult::failure_of(FailureKind::Crashed, "process exited with code 1 before reporting"),
            RunState::Crashed,
        ));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["t1"]["outcome"], "success");
        assert_eq!(value["t1"]["data"]["latency_ms"], 42);
        assert_eq!(value["t1"]["state"], "completed");
        assert_eq!(value["t1"]["elapsed_ms"], 1500);
        assert!(value["t1"].get("failure_detail").is_none());

        assert_eq!(value["t2"]["outcome"], "failure");
        assert_eq!(value["t2"]["failure_kind"], "crashed");
        assert_eq!(value["t2"]["state"], "crashed");
    }

    #[test]
    fn test_rerecord_replaces_in_place() {
        let mut report = RunReport::new();
        report.record(&outcome("a", TaskResult::failure("first"), RunState::Crashed));
        report.record(&outcome("b", TaskResult::success(), RunState::Completed));
        report.record(&outcome("a", TaskResult::success(), RunState::Completed));

        assert_eq!(report.names(), vec!["a", "b"]);
        assert!(report.get("a").unwrap().is_success());
    }
}
