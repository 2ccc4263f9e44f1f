//! Aider task tools: the `run_*` family and `prompt_aider`.
//!
//! Each tool is one row in [`TASK_TOOLS`]: a name, the argument carrying the
//! message, and the task type it fixes. `prompt_aider` leaves the task type to
//! the caller.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Envelope, MAX_PROMPT_CHARS, OUTPUT_TAIL_CHARS, ToolContext, output_schema, parse_params, require_text};
use crate::aider::{TaskType, build_arguments, child_environment, resolve_file_paths};
use crate::config::{self, AiderOptions};
use crate::error::{BridgeError, BridgeResult};
use crate::exec::{self, CommandSpec, ExecMode, Execution, ExecutionResult};
use crate::server::ToolDefinition;

pub const PROMPT_AIDER: &str = "prompt_aider";

/// Static description of one aider-backed tool.
#[derive(Debug, Clone, Copy)]
pub struct TaskTool {
    pub name: &'static str,
    pub description: &'static str,
    /// Argument that carries the message.
    pub field: &'static str,
    pub field_description: &'static str,
    /// `None` lets the caller choose through `task_type`.
    pub task_type: Option<TaskType>,
}

pub static TASK_TOOLS: &[TaskTool] = &[
    TaskTool {
        name: "run_research",
        description: "Run aider as a research analyst on a topic.",
        field: "topic",
        field_description: "Topic to research",
        task_type: Some(TaskType::Research),
    },
    TaskTool {
        name: "run_docs",
        description: "Run aider as a technical writer to document a subject.",
        field: "subject",
        field_description: "Subject to document",
        task_type: Some(TaskType::Documentation),
    },
    TaskTool {
        name: "run_security",
        description: "Run an aider security review over the given files.",
        field: "focus_area",
        field_description: "What the review should concentrate on",
        task_type: Some(TaskType::SecurityReview),
    },
    TaskTool {
        name: "run_code",
        description: "Ask aider to generate or modify code in the given files.",
        field: "request",
        field_description: "The code change to make",
        task_type: Some(TaskType::CodeModification),
    },
    TaskTool {
        name: "run_verify",
        description: "Ask aider to verify the given files against a requirement.",
        field: "verification_request",
        field_description: "What to verify",
        task_type: Some(TaskType::Verification),
    },
    TaskTool {
        name: "run_progress",
        description: "Ask aider for a progress report on the current work.",
        field: "update",
        field_description: "Progress context or question",
        task_type: Some(TaskType::ProgressReport),
    },
    TaskTool {
        name: "run_task",
        description: "Send a free-form prompt to aider with no role preamble.",
        field: "prompt",
        field_description: "Prompt passed to aider unchanged",
        task_type: Some(TaskType::General),
    },
];

pub static PROMPT_AIDER_TOOL: TaskTool = TaskTool {
    name: PROMPT_AIDER,
    description: "Send a prompt to aider with an optional task type that selects the role preamble.",
    field: "prompt_text",
    field_description: "Prompt for aider",
    task_type: None,
};

/// Look up a fixed-type task tool by name.
pub fn find(name: &str) -> Option<&'static TaskTool> {
    TASK_TOOLS.iter().find(|t| t.name == name)
}

/// Input schema for an aider-backed tool.
///
/// `with_background` is false for tools that always run captured.
pub fn input_schema(tool: &TaskTool, with_background: bool) -> Value {
    let files_required = tool.task_type.is_some_and(TaskType::requires_files);

    let mut files = json!({
        "type": "array",
        "items": { "type": "string" },
        "description": "Files to add to the aider session, relative to the workspace"
    });
    if files_required {
        files["minItems"] = json!(1);
    }

    let mut properties = json!({
        "files": files,
        "architect_model": { "type": "string", "description": "Override for --model" },
        "editor_model": { "type": "string", "description": "Override for --editor-model" },
        "no_detect_urls": { "type": "boolean", "default": true },
        "no_auto_commit": { "type": "boolean", "default": true },
        "yes_always": { "type": "boolean", "default": true },
        "extra_args": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Additional aider flags, appended before the file list"
        }
    });
    properties[tool.field] = json!({
        "type": "string",
        "description": tool.field_description,
        "minLength": 1,
        "maxLength": MAX_PROMPT_CHARS
    });
    if with_background {
        properties["background"] = json!({
            "type": "boolean",
            "default": true,
            "description": "Launch detached and return immediately"
        });
    }
    if tool.task_type.is_none() {
        let names: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
        properties["task_type"] = json!({
            "type": "string",
            "description": format!("One of: {}. Unknown values run as general.", names.join(", "))
        });
    }

    let mut required = vec![tool.field];
    if files_required {
        required.push("files");
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn tool_definition(tool: &TaskTool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.to_owned(),
        description: tool.description.to_owned(),
        input_schema: input_schema(tool, true),
        output_schema: Some(output_schema()),
    }
}

pub fn prompt_aider_definition() -> ToolDefinition {
    tool_definition(&PROMPT_AIDER_TOOL)
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(flatten)]
    options: AiderOptions,
}

/// A validated, fully resolved aider invocation.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub task_type: TaskType,
    pub spec: CommandSpec,
    pub background: bool,
}

/// Validate arguments and resolve configuration. No process is started.
///
/// Validation runs before configuration, so a malformed call reports
/// `ValidationError` even when models are also missing.
pub fn prepare(ctx: &ToolContext<'_>, tool: &TaskTool, arguments: Value) -> BridgeResult<PreparedRun> {
    let message = match arguments.get(tool.field) {
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(BridgeError::Validation(format!("`{}` must be a string", tool.field)));
        }
        None => {
            return Err(BridgeError::Validation(format!("missing required field `{}`", tool.field)));
        }
    };
    require_text(tool.field, &message, MAX_PROMPT_CHARS)?;

    let params: TaskParams = parse_params(arguments)?;
    let task_type = tool
        .task_type
        .unwrap_or_else(|| TaskType::from_optional(params.task_type.as_deref()));

    if task_type.requires_files() && params.files.is_empty() {
        return Err(BridgeError::Validation(format!(
            "`files` must list at least one file for {task_type} tasks"
        )));
    }
    let files = resolve_file_paths(&ctx.settings.workspace, &params.files)?;

    let resolved = config::resolve(&params.options, ctx.client_env, &ctx.settings.server_env)?;
    let args = build_arguments(&resolved, task_type, &message, &files);

    let mut spec = CommandSpec::new(ctx.settings.aider_command.clone(), args);
    spec.env = child_environment(&resolved, ctx.settings.layers(ctx.client_env));
    spec.cwd = Some(ctx.settings.workspace.clone());

    Ok(PreparedRun {
        task_type,
        spec,
        background: resolved.background,
    })
}

/// Run one aider task tool.
pub fn execute(ctx: &ToolContext<'_>, tool: &TaskTool, arguments: Value) -> BridgeResult<Envelope> {
    let run = prepare(ctx, tool, arguments)?;
    info!(tool = tool.name, task_type = %run.task_type, background = run.background, "starting aider");

    let mode = if run.background {
        ExecMode::Detached
    } else {
        ExecMode::Captured {
            timeout: Some(ctx.settings.aider_timeout),
        }
    };

    match exec::execute(&run.spec, mode)? {
        Execution::Launched(ack) => {
            let mut envelope = Envelope::success(format!(
                "aider launched in the background (pid {}) for a {} task.",
                ack.pid, run.task_type
            ));
            envelope.background = Some(true);
            envelope.pid = Some(ack.pid);
            envelope.executed_command = Some(ack.command_text);
            Ok(envelope)
        }
        Execution::Completed(result) => Ok(completed_envelope(&run, result)),
    }
}

fn completed_envelope(run: &PreparedRun, result: ExecutionResult) -> Envelope {
    let mut envelope = if result.succeeded() {
        Envelope::success(format!("aider finished the {} task successfully.", run.task_type))
    } else {
        let err = BridgeError::Aider {
            command: run.spec.program.clone(),
            exit_code: result.exit_code,
        };
        Envelope {
            success: false,
            status: format!("Error: {}", err.safe_message()),
            error_type: Some(err.kind()),
            ..Envelope::default()
        }
    };
    envelope.background = Some(false);
    envelope.exit_code = result.exit_code;
    envelope.stdout = Some(exec::tail(&result.stdout, OUTPUT_TAIL_CHARS));
    envelope.stderr = Some(exec::tail(&result.stderr, OUTPUT_TAIL_CHARS));
    envelope.executed_command = Some(result.command_text);
    envelope
}
