//! End-to-end integration tests for hwtask
//!
//! These tests run the real `mock_task` executable through:
//! 1. The launcher, one task at a time, for every way a task can end
//! 2. The coordinator, to check isolation between tasks in one run
//! 3. The `hwtask` binary, to check exit status and the written report

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use hwtask::coordinator::RunCoordinator;
use hwtask::ipc::protocol::RuntimePhase;
use hwtask::ipc::InspectionClient;
use hwtask::launcher::process::{RuntimeEnv, TaskProcess};
use hwtask::launcher::{LaunchSettings, RunState, TaskLauncher, TaskOutcome};
use hwtask::manifest::{LaunchSpec, Plan, TaskDefinition, TaskRegistry};
use hwtask::{FailureKind, Outcome};
use tempfile::TempDir;

/// Test context with an isolated runtime/data/config area
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        for sub in ["runtime", "data", "config"] {
            fs::create_dir_all(temp_dir.path().join(sub)).expect("Failed to create test dir");
        }
        Self { temp_dir }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Launch spec for `mock_task <mode>` with logs kept inside the test dir
    fn mock_spec(&self, mode: &str) -> LaunchSpec {
        let mut spec = LaunchSpec::new(mock_task_binary()).arg(mode);
        spec.env.insert("XDG_RUNTIME_DIR".into(), self.dir("runtime"));
        spec.env.insert("XDG_DATA_HOME".into(), self.dir("data"));
        spec
    }

    fn dir(&self, sub: &str) -> String {
        self.path().join(sub).display().to_string()
    }

    /// Write a manifest whose tasks all run `mock_task`
    fn write_manifest(&self, body: &str) -> PathBuf {
        let path = self.path().join("hwtask.yaml");
        let content = body.replace("@MOCK@", &mock_task_binary().display().to_string());
        fs::write(&path, content).expect("Failed to write manifest");
        path
    }

    /// Run the hwtask binary with an empty config
    fn hwtask(&self, args: &[&str]) -> Output {
        let config = self.path().join("config").join("config.toml");
        fs::write(&config, "[timeouts]\nstartup_grace_secs = 5\n").expect("Failed to write config");

        Command::new(env!("CARGO_BIN_EXE_hwtask"))
            .args(args)
            .env("HWTASK_CONFIG", &config)
            .env("XDG_RUNTIME_DIR", self.dir("runtime"))
            .env("XDG_DATA_HOME", self.dir("data"))
            .env("NO_COLOR", "1")
            .output()
            .expect("Failed to run hwtask")
    }
}

fn mock_task_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock_task"))
}

fn test_launcher() -> TaskLauncher {
    TaskLauncher::new(LaunchSettings {
        startup_grace: Duration::from_secs(5),
        release_grace: Duration::from_secs(2),
        linger: Duration::from_secs(10),
    })
}

async fn launch(ctx: &TestContext, name: &str, mode: &str, budget: Duration) -> TaskOutcome {
    let definition = TaskDefinition::new(name, "mock");
    test_launcher()
        .launch(&definition, &ctx.mock_spec(mode), budget, None)
        .await
}

/// Whether a process with this pid still exists
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

// ============== Launcher ==============

#[tokio::test]
async fn test_passing_task() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "pass", "pass", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.result.outcome(), Outcome::Success);
}

#[tokio::test]
async fn test_metrics_are_delivered() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "metrics", "metrics", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Completed);
    assert!(outcome.result.is_success());
    assert_eq!(outcome.result.data()["latency_ms"], 42);
}

#[tokio::test]
async fn test_task_reported_failure() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "fail", "fail", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Task));
    assert!(outcome.result.failure_detail().unwrap().contains("41fps"));
}

#[tokio::test]
async fn test_hanging_task_times_out_and_is_terminated() {
    let ctx = TestContext::new();
    let started = std::time::Instant::now();
    let outcome = launch(&ctx, "hang", "hang", Duration::from_secs(2)).await;

    assert_eq!(outcome.state, RunState::TimedOut);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Timeout));
    assert!(outcome.result.failure_detail().unwrap().contains("timeout"));
    assert!(started.elapsed() < Duration::from_secs(15));

    #[cfg(unix)]
    {
        let pid = outcome.pid.expect("hang task was spawned");
        assert!(!process_alive(pid), "process {pid} survived its deadline");
    }
}

#[tokio::test]
async fn test_panicking_task_is_crashed() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "panic", "panic", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Crashed);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Crashed));
    assert!(outcome.result.failure_detail().unwrap().contains("code 101"));
}

#[tokio::test]
async fn test_exiting_task_is_crashed() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "exit", "exit", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Crashed);
    assert_eq!(
        outcome.result.failure_detail(),
        Some("process exited with code 3 before reporting")
    );
}

#[tokio::test]
async fn test_body_error_without_result_is_crashed() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "error", "error", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Crashed);
    assert!(outcome.result.failure_detail().unwrap().contains("code 1"));
}

#[tokio::test]
async fn test_published_result_survives_body_error() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "early", "publish-then-error", Duration::from_secs(30)).await;

    assert_eq!(outcome.state, RunState::Completed);
    assert!(outcome.result.is_success());
    assert_eq!(outcome.result.data()["published_early"], true);
}

#[tokio::test]
async fn test_double_publish_is_a_failure() {
    let ctx = TestContext::new();
    let outcome = launch(&ctx, "twice", "double-publish", Duration::from_secs(30)).await;

    assert_eq!(outcome.result.outcome(), Outcome::Failure);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::DoublePublish));
}

#[tokio::test]
async fn test_missing_startup_signal_is_a_connection_failure() {
    let ctx = TestContext::new();
    let launcher = TaskLauncher::new(LaunchSettings {
        startup_grace: Duration::from_secs(1),
        ..LaunchSettings::default()
    });
    let definition = TaskDefinition::new("silent", "mock");

    let outcome = launcher
        .launch(&definition, &ctx.mock_spec("no-signal"), Duration::from_secs(30), None)
        .await;

    assert_eq!(outcome.state, RunState::Crashed);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::ConnectionFailed));

    #[cfg(unix)]
    assert!(!process_alive(outcome.pid.expect("silent task was spawned")));
}

#[tokio::test]
async fn test_hard_stop_ends_task_before_its_own_timeout() {
    let ctx = TestContext::new();
    let definition = TaskDefinition::new("stuck", "mock");
    let hard_stop = tokio::time::Instant::now() + Duration::from_secs(2);

    let started = std::time::Instant::now();
    let outcome = test_launcher()
        .launch(&definition, &ctx.mock_spec("hang"), Duration::from_secs(60), Some(hard_stop))
        .await;

    assert_eq!(outcome.state, RunState::TimedOut);
    assert_eq!(outcome.result.failure_kind(), Some(FailureKind::Timeout));
    assert!(outcome
        .result
        .failure_detail()
        .unwrap()
        .starts_with("run deadline reached after"));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(10));

    #[cfg(unix)]
    {
        let pid = outcome.pid.expect("stuck task was spawned");
        assert!(!process_alive(pid), "process {pid} survived the run deadline");
    }
}

// ============== Inspection channel ==============

#[tokio::test]
async fn test_status_reports_published_phase() {
    let ctx = TestContext::new();
    let env = RuntimeEnv {
        device: None,
        linger: Some(Duration::from_secs(10)),
    };
    let mut process =
        TaskProcess::spawn("status-check", &ctx.mock_spec("pass"), &env).expect("spawn mock_task");

    let mut client = InspectionClient::connect(&mut process, Duration::from_secs(5))
        .await
        .expect("connect to runtime");

    let status = client.status().await.expect("status while running");
    assert_eq!(status.task, "status-check");
    assert_eq!(Some(status.pid), process.pid());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let result = client
        .await_result(&mut process, deadline, Duration::from_secs(30))
        .await
        .expect("result collected");
    assert!(result.is_success());

    let status = client.status().await.expect("status after publish");
    assert_eq!(status.phase, RuntimePhase::Published);

    client.release().await.expect("release acknowledged");
    process.terminate().await;
}

// ============== Coordinator ==============

#[tokio::test]
async fn test_crash_does_not_affect_next_task() {
    let ctx = TestContext::new();
    let queue = vec![
        TaskDefinition::new("a-crash", "mock"),
        TaskDefinition::new("b-metrics", "mock"),
    ];
    let mut registry = TaskRegistry::default();
    registry.insert("a-crash", ctx.mock_spec("panic"));
    registry.insert("b-metrics", ctx.mock_spec("metrics"));

    let plan = Plan {
        queue,
        skipped: Vec::new(),
    };
    let report = RunCoordinator::new(test_launcher(), registry)
        .with_default_timeout(Duration::from_secs(30))
        .run(&plan)
        .await;

    assert_eq!(report.names(), vec!["a-crash", "b-metrics"]);
    assert_eq!(report.failing(), vec!["a-crash"]);
    assert_eq!(report.get("b-metrics").unwrap().data["latency_ms"], 42);
}

#[tokio::test]
async fn test_parallel_run_shares_device_serially() {
    let ctx = TestContext::new();
    let mut queue = Vec::new();
    let mut registry = TaskRegistry::default();
    for name in ["one", "two"] {
        let mut task = TaskDefinition::new(name, "mock");
        task.device = Some("pixel-7".to_string());
        queue.push(task);
        registry.insert(name, ctx.mock_spec("slow"));
    }

    let plan = Plan {
        queue,
        skipped: Vec::new(),
    };
    let started = std::time::Instant::now();
    let report = RunCoordinator::new(test_launcher(), registry)
        .with_jobs(2)
        .run(&plan)
        .await;

    assert!(report.success());
    // Each task sleeps 500ms while holding the device
    assert!(started.elapsed() >= Duration::from_millis(1000));
}

#[tokio::test]
async fn test_run_deadline_stops_running_task_and_skips_rest() {
    let ctx = TestContext::new();
    let queue = vec![
        TaskDefinition::new("stuck", "mock"),
        TaskDefinition::new("after", "mock"),
    ];
    let mut registry = TaskRegistry::default();
    registry.insert("stuck", ctx.mock_spec("hang"));
    registry.insert("after", ctx.mock_spec("pass"));

    let plan = Plan {
        queue,
        skipped: Vec::new(),
    };
    let started = std::time::Instant::now();
    let report = RunCoordinator::new(test_launcher(), registry)
        .with_default_timeout(Duration::from_secs(60))
        .with_run_timeout(Some(Duration::from_secs(2)))
        .run(&plan)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.names(), vec!["stuck", "after"]);
    assert_eq!(report.failing(), vec!["stuck", "after"]);

    let stuck = report.get("stuck").unwrap();
    assert_eq!(stuck.state, RunState::TimedOut);
    assert_eq!(stuck.failure_kind, Some(FailureKind::Timeout));
    assert!(stuck
        .failure_detail
        .as_deref()
        .unwrap()
        .contains("run deadline reached"));

    let after = report.get("after").unwrap();
    assert_eq!(after.state, RunState::Pending);
    assert_eq!(after.failure_kind, Some(FailureKind::RunDeadline));

    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(10), "run took {elapsed:?}");
}

// ============== CLI ==============

const E2E_MANIFEST: &str = r#"
tasks:
  t1:
    stage: S1
    command: "@MOCK@"
    args: [metrics]
  t2:
    stage: S2
    required_agent_capabilities: [X]
    command: "@MOCK@"
    args: [pass]
"#;

#[test]
fn test_cli_runs_stage_and_writes_report() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(E2E_MANIFEST);
    let report = ctx.path().join("report.json");

    let output = ctx.hwtask(&[
        "run",
        "--stage",
        "S1",
        "--manifest",
        manifest.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    let tasks = report.as_object().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(report["t1"]["outcome"], "success");
    assert_eq!(report["t1"]["data"]["latency_ms"], 42);
}

#[test]
fn test_cli_timeout_fails_run() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(
        r#"
tasks:
  stuck:
    stage: S1
    timeout_secs: 2
    command: "@MOCK@"
    args: [hang]
"#,
    );
    let report = ctx.path().join("report.json");

    let output = ctx.hwtask(&[
        "run",
        "--manifest",
        manifest.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("stuck"));

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["stuck"]["outcome"], "failure");
    assert!(report["stuck"]["failure_detail"]
        .as_str()
        .unwrap()
        .contains("timeout"));
}

#[test]
fn test_cli_unknown_task_is_preflight_error() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(E2E_MANIFEST);
    let report = ctx.path().join("report.json");

    let output = ctx.hwtask(&[
        "run",
        "--task",
        "doesNotExist",
        "--manifest",
        manifest.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("doesNotExist"));
    assert!(!report.exists());
}

#[test]
fn test_cli_missing_executable_is_preflight_error() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(
        r#"
tasks:
  ghost:
    stage: S1
    command: bin/not-built
"#,
    );

    let output = ctx.hwtask(&["run", "--manifest", manifest.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not-built"));
}

#[test]
fn test_cli_list_shows_plan() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(E2E_MANIFEST);

    let output = ctx.hwtask(&["list", "--all", "--manifest", manifest.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("t1"));
    assert!(stdout.contains("skipped, missing: X"));

    let output = ctx.hwtask(&[
        "list",
        "--all",
        "--capability",
        "X",
        "--manifest",
        manifest.to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("skipped"));
}

#[test]
fn test_cli_json_names_failing_tasks_on_stderr() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(
        r#"
tasks:
  good:
    stage: S1
    command: "@MOCK@"
    args: [pass]
  stuck:
    stage: S1
    timeout_secs: 1
    command: "@MOCK@"
    args: [hang]
"#,
    );

    let output = ctx.hwtask(&["run", "--json", "--manifest", manifest.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is only the JSON report");
    assert_eq!(report["good"]["outcome"], "success");
    assert_eq!(report["stuck"]["outcome"], "failure");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failing: stuck"), "stderr: {stderr}");
}

#[test]
fn test_cli_json_passing_run_has_no_failing_line() {
    let ctx = TestContext::new();
    let manifest = ctx.write_manifest(E2E_MANIFEST);

    let output = ctx.hwtask(&[
        "run",
        "--json",
        "--stage",
        "S1",
        "--manifest",
        manifest.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!String::from_utf8_lossy(&output.stderr).contains("Failing:"));
}
