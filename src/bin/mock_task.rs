//! Mock task executable for integration testing
//!
//! Built on the task runtime harness; the first argument picks how it
//! behaves so tests can exercise every way a task can end.

use std::time::Duration;

use hwtask::runtime::TaskContext;
use hwtask::TaskResult;

fn main() {
    let mode = std::env::args().nth(1).unwrap_or_else(|| "pass".to_string());

    // Never announces an endpoint
    if mode == "no-signal" {
        eprintln!("mock_task: staying silent");
        std::thread::sleep(Duration::from_secs(120));
        std::process::exit(0);
    }

    hwtask::runtime::main(move |ctx| behave(mode, ctx))
}

async fn behave(mode: String, ctx: TaskContext) -> Result<TaskResult, String> {
    match mode.as_str() {
        "pass" => Ok(TaskResult::success()),

        "metrics" => Ok(TaskResult::success()
            .with_data("latency_ms", 42)
            .with_data("device", ctx.device().unwrap_or("none"))),

        "fail" => Ok(TaskResult::failure("assertion failed: expected 60fps, measured 41fps")),

        "hang" => {
            std::future::pending::<()>().await;
            Ok(TaskResult::success())
        }

        "panic" => panic!("mock_task: deliberate panic"),

        "exit" => std::process::exit(3),

        "error" => Err("mock_task: teardown failed".to_string()),

        "publish-then-error" => {
            ctx.publish(TaskResult::success().with_data("published_early", true))
                .map_err(|e| e.to_string())?;
            Err("mock_task: teardown failed after publishing".to_string())
        }

        "double-publish" => {
            ctx.publish(TaskResult::success()).map_err(|e| e.to_string())?;
            Ok(TaskResult::failure("second result"))
        }

        "slow" => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(TaskResult::success().with_data("slept_ms", 500))
        }

        other => Err(format!("mock_task: unknown mode '{}'", other)),
    }
}
