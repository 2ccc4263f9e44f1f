//! Tool router: registers and dispatches MCP tool calls.
//!
//! Every tool takes JSON arguments and produces an [`Envelope`]. Handler
//! errors never escape [`ToolRouter::call_tool`]: they are logged in full and
//! folded into an envelope with `success = false`, an `errorType`, and a
//! single-line message.

pub mod ceo_and_board;
pub mod double_compute;
pub mod finance_experts;
pub mod panel_tool;
pub mod tasks;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::config::{EnvMap, Settings};
use crate::error::{BridgeError, BridgeResult, ErrorKind, first_line};
use crate::gemini::GenerativeModel;
use crate::server::{ContentItem, ToolCallResult, ToolDefinition};

/// Max characters of stdout/stderr echoed back in an envelope.
pub const OUTPUT_TAIL_CHARS: usize = 4000;

/// Max characters for prompt-like inputs.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Max characters for panel topics.
pub const MAX_TOPIC_CHARS: usize = 2_000;

/// Per-call view handed to every tool handler.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub settings: &'a Settings,
    pub model: &'a dyn GenerativeModel,
    /// Client-supplied environment overrides for this call.
    pub client_env: &'a EnvMap,
}

// ---------------------------------------------------------------------------
// Result envelope
// ---------------------------------------------------------------------------

/// One captured aider run inside a multi-run envelope.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub executed_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

/// Per-member panel failure as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub member: String,
    pub error: String,
}

/// Standard tool result, serialized as `structuredContent`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    /// Human-readable status; also the first content item.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_save_success: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub personas_processed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub api_errors: Vec<ItemError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_task_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<RunSummary>,
    /// Extra content items after the status line.
    #[serde(skip)]
    pub notes: Vec<String>,
}

impl Envelope {
    pub fn success(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status.into(),
            ..Self::default()
        }
    }

    /// Envelope for a handler error: kind plus safe single-line message.
    pub fn failure(err: &BridgeError) -> Self {
        Self {
            success: false,
            status: format!("Error: {}", err.safe_message()),
            error_type: Some(err.kind()),
            ..Self::default()
        }
    }

    /// Convert to the MCP wire result.
    pub fn into_result(self) -> ToolCallResult {
        let structured = serde_json::to_value(&self)
            .map_err(|e| error!(error = %e, "failed to serialize envelope"))
            .ok();
        let mut content = vec![ContentItem::text(self.status)];
        content.extend(self.notes.into_iter().map(ContentItem::text));
        ToolCallResult {
            content,
            is_error: !self.success,
            structured_content: structured,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared validation helpers
// ---------------------------------------------------------------------------

/// Deserialize tool arguments, treating `null` as an empty object.
pub fn parse_params<T: DeserializeOwned>(arguments: serde_json::Value) -> BridgeResult<T> {
    let arguments = if arguments.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| BridgeError::Validation(first_line(&e.to_string())))
}

/// Require `value` to be non-blank and at most `max_chars` long.
pub fn require_text(field: &str, value: &str, max_chars: usize) -> BridgeResult<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::Validation(format!("`{field}` must not be empty")));
    }
    let len = value.chars().count();
    if len > max_chars {
        return Err(BridgeError::Validation(format!(
            "`{field}` is {len} characters; the limit is {max_chars}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output schema
// ---------------------------------------------------------------------------

/// JSON Schema of [`Envelope`], shared by every tool.
pub fn output_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "success": { "type": "boolean" },
            "status": { "type": "string" },
            "errorType": {
                "type": "string",
                "enum": ["ValidationError", "ConfigurationError", "ExecutionError",
                         "AiderError", "ApiError", "FileSystemError", "TimedOut"]
            },
            "executedCommand": { "type": "string" },
            "background": { "type": "boolean" },
            "pid": { "type": "integer" },
            "exitCode": { "type": ["integer", "null"] },
            "stdout": { "type": "string", "description": "Tail of captured standard output" },
            "stderr": { "type": "string", "description": "Tail of captured standard error" },
            "outputFilePath": { "type": "string" },
            "fileSaveSuccess": { "type": "boolean" },
            "personasProcessed": { "type": "array", "items": { "type": "string" } },
            "apiErrors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "member": { "type": "string" },
                        "error": { "type": "string" }
                    },
                    "required": ["member", "error"]
                }
            },
            "recommendedTaskType": { "type": "string" },
            "recommendedPrompt": { "type": "string" },
            "runs": { "type": "array", "items": { "type": "object" } }
        },
        "required": ["success", "status"]
    })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Tool router that dispatches MCP tool calls to implementations.
pub struct ToolRouter {
    settings: Settings,
    model: Box<dyn GenerativeModel>,
}

impl ToolRouter {
    /// Create a new tool router.
    pub fn new(settings: Settings, model: Box<dyn GenerativeModel>) -> Self {
        Self { settings, model }
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// List all available tools with their JSON Schema definitions.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = tasks::TASK_TOOLS.iter().map(tasks::tool_definition).collect();
        tools.push(tasks::prompt_aider_definition());
        tools.push(double_compute::tool_definition());
        tools.push(finance_experts::tool_definition());
        tools.push(ceo_and_board::tool_definition());
        tools
    }

    /// Call a tool by name with the given JSON arguments.
    ///
    /// Always produces a result; failures are reported inside it.
    pub fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        client_env: &EnvMap,
    ) -> ToolCallResult {
        debug!(tool = name, "dispatching tool call");

        let ctx = ToolContext {
            settings: &self.settings,
            model: self.model.as_ref(),
            client_env,
        };

        let outcome = if let Some(task) = tasks::find(name) {
            tasks::execute(&ctx, task, arguments)
        } else {
            match name {
                tasks::PROMPT_AIDER => tasks::execute(&ctx, &tasks::PROMPT_AIDER_TOOL, arguments),
                double_compute::NAME => double_compute::execute(&ctx, arguments),
                finance_experts::NAME => finance_experts::execute(&ctx, arguments),
                ceo_and_board::NAME => ceo_and_board::execute(&ctx, arguments),
                _ => Err(BridgeError::Validation(format!("Unknown tool: {name}"))),
            }
        };

        match outcome {
            Ok(envelope) => envelope.into_result(),
            Err(e) => {
                error!(tool = name, kind = %e.kind(), error = ?e, "tool call failed");
                Envelope::failure(&e).into_result()
            }
        }
    }
}
