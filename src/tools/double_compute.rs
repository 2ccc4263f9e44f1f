//! `double_compute`: run the same aider prompt twice, captured, and report
//! both runs side by side.

use serde_json::Value;
use tracing::{info, warn};

use super::tasks::{self, PreparedRun, TaskTool};
use super::{Envelope, OUTPUT_TAIL_CHARS, RunSummary, ToolContext, output_schema};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::exec::{self, ExecMode, Execution};
use crate::server::ToolDefinition;

pub const NAME: &str = "double_compute";

const RUNS: usize = 2;

static TOOL: TaskTool = TaskTool {
    name: NAME,
    description: "Run the same aider prompt twice in the foreground and return both results \
                  for comparison.",
    field: "prompt_text",
    field_description: "Prompt sent to both runs",
    task_type: None,
};

pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME.to_owned(),
        description: TOOL.description.to_owned(),
        input_schema: tasks::input_schema(&TOOL, false),
        output_schema: Some(output_schema()),
    }
}

pub fn execute(ctx: &ToolContext<'_>, arguments: Value) -> BridgeResult<Envelope> {
    let run = tasks::prepare(ctx, &TOOL, arguments)?;
    if run.background {
        info!("double_compute always runs in the foreground; ignoring background");
    }

    let runs: Vec<RunSummary> = (1..=RUNS).map(|n| run_once(ctx, &run, n)).collect();
    Ok(summarize(runs))
}

fn run_once(ctx: &ToolContext<'_>, run: &PreparedRun, n: usize) -> RunSummary {
    let mode = ExecMode::Captured {
        timeout: Some(ctx.settings.aider_timeout),
    };
    info!(run = n, "double_compute run starting");
    match exec::execute(&run.spec, mode) {
        Ok(Execution::Completed(result)) => {
            let error_type = (!result.succeeded()).then_some(ErrorKind::Aider);
            RunSummary {
                success: result.succeeded(),
                exit_code: result.exit_code,
                stdout: exec::tail(&result.stdout, OUTPUT_TAIL_CHARS),
                stderr: exec::tail(&result.stderr, OUTPUT_TAIL_CHARS),
                executed_command: result.command_text,
                error_type,
            }
        }
        Ok(Execution::Launched(ack)) => RunSummary {
            // Captured mode never launches detached.
            success: false,
            executed_command: ack.command_text,
            error_type: Some(ErrorKind::Execution),
            ..RunSummary::default()
        },
        Err(e) => {
            warn!(run = n, error = %e, "double_compute run failed");
            failed_run(run, &e)
        }
    }
}

fn failed_run(run: &PreparedRun, err: &BridgeError) -> RunSummary {
    RunSummary {
        success: false,
        exit_code: None,
        stdout: String::new(),
        stderr: err.safe_message(),
        executed_command: run.spec.display(),
        error_type: Some(err.kind()),
    }
}

/// Fold both runs into one envelope. A run that never completed outranks one
/// that exited non-zero when picking the overall error type.
fn summarize(runs: Vec<RunSummary>) -> Envelope {
    let ok = runs.iter().filter(|r| r.success).count();
    let error_type = runs
        .iter()
        .filter_map(|r| r.error_type)
        .find(|k| *k != ErrorKind::Aider)
        .or_else(|| runs.iter().find_map(|r| r.error_type));

    let status = if error_type.is_none() {
        format!("Both aider runs completed successfully ({ok}/{RUNS}).")
    } else {
        format!("{ok}/{RUNS} aider runs succeeded.")
    };

    Envelope {
        success: error_type.is_none(),
        status,
        error_type,
        background: Some(false),
        executed_command: runs.first().map(|r| r.executed_command.clone()),
        runs,
        ..Envelope::default()
    }
}
